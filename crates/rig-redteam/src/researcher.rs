//! Research agents
//!
//! A research agent answers one [`AgentTask`] with findings. It never
//! returns an error: look-up failures surface as a `partial` or `failed`
//! [`AgentResult`] so one bad task cannot take a supervisor pass down.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{LlmError, SearchError};
use crate::llm::{ModelClient, TokenUsage};
use crate::prompts;
use crate::retry::{call_with_retry_observed, RetryPolicy};
use crate::search::{SearchHit, SearchProvider};
use crate::state::{AgentResult, AgentTask, Finding};
use crate::supervisor::normalize_question;
use crate::usage::{CallKind, Component, UsageTracker};

#[async_trait]
pub trait ResearchAgent: Send + Sync + 'static {
    /// Research one task; always yields exactly one result for it
    async fn execute(&self, task: AgentTask) -> AgentResult;
}

#[derive(Debug, Deserialize)]
struct QueryPlan {
    #[serde(default)]
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(default)]
    findings: Vec<Finding>,
}

/// Research agent backed by web search and a summarization model.
///
/// Searches the task question plus a few model-drafted queries, then
/// compresses the hits into `{claim, source}` findings.
pub struct WebResearchAgent {
    search: Arc<dyn SearchProvider>,
    model: ModelClient,
    usage: Arc<UsageTracker>,
    retry: RetryPolicy,
    call_timeout: Duration,
    max_searches: usize,
    results_per_query: usize,
}

impl WebResearchAgent {
    pub fn new(search: Arc<dyn SearchProvider>, model: ModelClient, usage: Arc<UsageTracker>) -> Self {
        Self {
            search,
            model: model.for_component(Component::ResearchAgent),
            usage,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            max_searches: 3,
            results_per_query: 5,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_searches(mut self, max: usize) -> Self {
        self.max_searches = max.max(1);
        self
    }

    pub fn with_results_per_query(mut self, k: usize) -> Self {
        self.results_per_query = k.max(1);
        self
    }

    /// The task question first, then drafted queries, deduplicated
    async fn plan_queries(&self, task: &AgentTask) -> Vec<String> {
        let mut queries = vec![task.question.trim().to_string()];
        if self.max_searches > 1 {
            let prompt = prompts::query_plan_prompt(&task.question, &task.context, self.max_searches - 1);
            match self
                .model
                .complete_json::<QueryPlan>(prompts::QUERY_PLAN_SYSTEM, &prompt)
                .await
            {
                Ok(plan) => queries.extend(plan.queries),
                Err(e) => debug!(task = %task.id, error = %e, "query planning failed, searching the question only"),
            }
        }

        let mut seen = HashSet::new();
        queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty() && seen.insert(normalize_question(q)))
            .take(self.max_searches)
            .collect()
    }

    fn record_search(&self) {
        self.usage.record(
            Component::ResearchAgent,
            CallKind::Search,
            self.search.name(),
            TokenUsage::default(),
        );
    }

    async fn lookup(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let label = format!("search/{}", self.search.name());
        call_with_retry_observed(
            &self.retry,
            self.call_timeout,
            &label,
            move || async move {
                let outcome = self.search.search(query, self.results_per_query).await;
                self.record_search();
                outcome
            },
            || self.record_search(),
        )
        .await
    }

    async fn compress(&self, task: &AgentTask, hits: &[SearchHit]) -> Result<Vec<Finding>, LlmError> {
        let results = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("{}. {}", i + 1, hit.to_markdown()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = prompts::compress_prompt(&task.question, &results);

        let extraction: Extraction = self
            .model
            .complete_json(prompts::COMPRESS_SYSTEM, &prompt)
            .await?;

        Ok(extraction
            .findings
            .into_iter()
            .map(|f| Finding::new(f.claim.trim(), f.source.trim()))
            .filter(|f| !f.claim.is_empty() && !f.source.is_empty())
            .collect())
    }
}

#[async_trait]
impl ResearchAgent for WebResearchAgent {
    async fn execute(&self, task: AgentTask) -> AgentResult {
        let queries = self.plan_queries(&task).await;

        let mut hits: Vec<SearchHit> = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut failures = Vec::new();

        for query in &queries {
            match self.lookup(query).await {
                Ok(found) => hits.extend(found.into_iter().filter(|h| seen_urls.insert(h.url.clone()))),
                Err(e) => {
                    warn!(task = %task.id, query = %query, error = %e, "search failed after retries");
                    failures.push(format!("{query}: {e}"));
                }
            }
        }

        if failures.len() == queries.len() {
            return AgentResult::failed(
                &task.id,
                format!("all {} searches failed; last error: {}", queries.len(), failures.join("; ")),
            );
        }

        let findings = if hits.is_empty() {
            Vec::new()
        } else {
            match self.compress(&task, &hits).await {
                Ok(findings) => findings,
                Err(e) => {
                    warn!(task = %task.id, error = %e, "finding extraction failed");
                    return AgentResult::failed(&task.id, format!("finding extraction failed: {e}"));
                }
            }
        };

        info!(
            task = %task.id,
            searches = queries.len(),
            hits = hits.len(),
            findings = findings.len(),
            "research task finished"
        );

        if failures.is_empty() {
            AgentResult::ok(&task.id, findings)
        } else {
            AgentResult::partial(
                &task.id,
                findings,
                format!("{} of {} searches failed: {}", failures.len(), queries.len(), failures.join("; ")),
            )
        }
    }
}
