//! Usage ledger for external calls
//!
//! One [`UsageTracker`] is created per run and shared by `Arc` with every
//! component that talks to an external service. [`UsageTracker::record`] is
//! the only mutator; writes are serialized by a single mutex and
//! [`UsageTracker::summary`] returns an owned snapshot, so progress can be
//! reported while research agents are still appending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::llm::TokenUsage;
use crate::pricing::PricingTable;

/// Component that issued an external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Scoping,
    Supervisor,
    ResearchAgent,
    Evaluator,
}

/// Kind of external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Completion,
    Search,
    LinkCheck,
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub component: Component,
    pub kind: CallKind,
    /// Model name for completions, provider name for searches, URL for link checks
    pub label: String,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub at: DateTime<Utc>,
}

/// Aggregated counters for one slice of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, record: &UsageRecord) {
        self.calls += 1;
        self.tokens += record.tokens;
        self.cost_usd += record.cost_usd;
    }
}

/// Read-only aggregate of the ledger at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total: UsageTotals,
    pub by_component: BTreeMap<Component, UsageTotals>,
    pub by_kind: BTreeMap<CallKind, UsageTotals>,
    /// Per model / per search provider
    pub by_label: BTreeMap<String, UsageTotals>,
    pub started_at: DateTime<Utc>,
    pub last_record_at: Option<DateTime<Utc>>,
}

impl UsageSummary {
    pub fn component(&self, component: Component) -> UsageTotals {
        self.by_component.get(&component).cloned().unwrap_or_default()
    }

    pub fn kind(&self, kind: CallKind) -> UsageTotals {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub fn search_calls(&self) -> u64 {
        self.kind(CallKind::Search).calls
    }
}

/// Append-only, concurrency-safe usage ledger
#[derive(Debug)]
pub struct UsageTracker {
    records: Mutex<Vec<UsageRecord>>,
    pricing: PricingTable,
    started_at: DateTime<Utc>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    /// Empty ledger with the default pricing table
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::default())
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            pricing,
            started_at: Utc::now(),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Append one call to the ledger and return its cost.
    ///
    /// Completions are priced per token by model; searches at the provider's
    /// flat per-call price; link checks are free.
    pub fn record(&self, component: Component, kind: CallKind, label: &str, tokens: TokenUsage) -> f64 {
        let cost_usd = match kind {
            CallKind::Completion => self.pricing.completion_cost(label, &tokens),
            CallKind::Search => self.pricing.search_cost(label),
            CallKind::LinkCheck => 0.0,
        };

        let record = UsageRecord {
            component,
            kind,
            label: label.to_string(),
            tokens,
            cost_usd,
            at: Utc::now(),
        };
        self.lock().push(record);
        cost_usd
    }

    /// Snapshot of every record so far
    pub fn records(&self) -> Vec<UsageRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn summary(&self) -> UsageSummary {
        let records = self.records();

        let mut summary = UsageSummary {
            total: UsageTotals::default(),
            by_component: BTreeMap::new(),
            by_kind: BTreeMap::new(),
            by_label: BTreeMap::new(),
            started_at: self.started_at,
            last_record_at: records.last().map(|r| r.at),
        };

        for record in &records {
            summary.total.add(record);
            summary.by_component.entry(record.component).or_default().add(record);
            summary.by_kind.entry(record.kind).or_default().add(record);
            if record.kind != CallKind::LinkCheck {
                summary.by_label.entry(record.label.clone()).or_default().add(record);
            }
        }

        summary
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UsageRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_tracker_is_empty() {
        let tracker = UsageTracker::new();
        assert!(tracker.is_empty());

        let summary = tracker.summary();
        assert_eq!(summary.total, UsageTotals::default());
        assert!(summary.last_record_at.is_none());
    }

    #[test]
    fn test_summary_groups_by_component_and_kind() {
        let tracker = UsageTracker::new();
        tracker.record(Component::Scoping, CallKind::Completion, "gpt-4o", TokenUsage::new(1000, 0));
        tracker.record(Component::ResearchAgent, CallKind::Search, "tavily", TokenUsage::default());
        tracker.record(Component::ResearchAgent, CallKind::Search, "tavily", TokenUsage::default());
        tracker.record(Component::Evaluator, CallKind::Completion, "gpt-4o", TokenUsage::new(0, 1000));

        let summary = tracker.summary();
        assert_eq!(summary.total.calls, 4);
        assert_eq!(summary.search_calls(), 2);
        assert_eq!(summary.component(Component::ResearchAgent).calls, 2);
        assert_eq!(summary.component(Component::Supervisor).calls, 0);
        assert!((summary.component(Component::Scoping).cost_usd - 2.5).abs() < 1e-9);
        assert!((summary.component(Component::Evaluator).cost_usd - 10.0).abs() < 1e-9);
        assert!((summary.kind(CallKind::Search).cost_usd - 0.016).abs() < 1e-9);
        assert_eq!(summary.by_label["gpt-4o"].calls, 2);
    }

    #[test]
    fn test_link_checks_are_free_and_not_labelled() {
        let tracker = UsageTracker::new();
        let cost = tracker.record(
            Component::Evaluator,
            CallKind::LinkCheck,
            "https://example.org",
            TokenUsage::default(),
        );
        assert_eq!(cost, 0.0);

        let summary = tracker.summary();
        assert_eq!(summary.kind(CallKind::LinkCheck).calls, 1);
        assert!(summary.by_label.is_empty());
    }

    #[test]
    fn test_summary_serializes_enum_keys() {
        let tracker = UsageTracker::new();
        tracker.record(Component::ResearchAgent, CallKind::Search, "tavily", TokenUsage::default());

        let json = serde_json::to_value(tracker.summary()).unwrap();
        assert_eq!(json["by_component"]["research_agent"]["calls"], 1);
        assert_eq!(json["by_kind"]["search"]["calls"], 1);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let tracker = Arc::new(UsageTracker::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    tracker.record(
                        Component::ResearchAgent,
                        CallKind::Completion,
                        "gpt-4o-mini",
                        TokenUsage::new(10, 5),
                    );
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let summary = tracker.summary();
        assert_eq!(summary.total.calls, 400);
        assert_eq!(summary.total.tokens, TokenUsage::new(4000, 2000));
    }
}
