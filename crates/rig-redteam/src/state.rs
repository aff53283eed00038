//! Research data model
//!
//! Briefs, tasks, agent results, drafts and evaluations. All of these are
//! immutable once built; the refinement loop only ever replaces them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Structured research objective, produced once by the Scoping Coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub objective: String,
    pub sub_questions: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
}

impl ResearchBrief {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            sub_questions: Vec::new(),
            constraints: BTreeMap::new(),
        }
    }

    pub fn with_sub_question(mut self, question: impl Into<String>) -> Self {
        self.sub_questions.push(question.into());
        self
    }

    pub fn with_sub_questions<I, S>(mut self, questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_questions.extend(questions.into_iter().map(Into::into));
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    /// Objective and constraints rendered as agent context
    pub fn context(&self) -> String {
        let mut context = format!("Research objective: {}", self.objective);
        for (key, value) in &self.constraints {
            context.push_str(&format!("\n- {}: {}", key, value));
        }
        context
    }
}

/// One focused question dispatched to a research agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique within one supervisor pass
    pub id: String,
    pub question: String,
    pub context: String,
}

/// A claim and the source that supports it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Finding {
    pub claim: String,
    pub source: String,
}

impl Finding {
    pub fn new(claim: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Ok,
    Partial,
    Failed,
}

/// Outcome of one `AgentTask`, produced exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: String,
    pub findings: Vec<Finding>,
    pub status: AgentStatus,
    pub error: Option<String>,
}

impl AgentResult {
    pub fn ok(task_id: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self {
            task_id: task_id.into(),
            findings,
            status: AgentStatus::Ok,
            error: None,
        }
    }

    pub fn partial(task_id: impl Into<String>, findings: Vec<Finding>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            findings,
            status: AgentStatus::Partial,
            error: Some(reason.into()),
        }
    }

    pub fn failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            findings: Vec::new(),
            status: AgentStatus::Failed,
            error: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == AgentStatus::Failed
    }
}

/// Which tasks of a pass did not fully succeed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub task_count: usize,
    pub failed_task_ids: Vec<String>,
    pub partial_task_ids: Vec<String>,
}

/// One candidate report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftReport {
    pub body: String,
    pub citations: BTreeSet<String>,
    pub iteration: u32,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl DraftReport {
    /// A report supplied by the caller (enrichment mode); its citations are
    /// the URLs it mentions.
    pub fn from_initial_report(body: impl Into<String>) -> Self {
        let body = body.into();
        let citations = extract_urls(&body);
        Self {
            body,
            citations,
            iteration: 0,
            findings: Vec::new(),
            provenance: Provenance::default(),
        }
    }
}

/// Collect http(s) URLs mentioned in free text
pub fn extract_urls(text: &str) -> BTreeSet<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '<' | '>' | '[' | ']' | '"'))
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(|token| token.trim_end_matches(['.', ',', ';', ':']).to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Refine,
}

/// Scores and critique for one draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub objectivity: f64,
    /// Lower is less biased
    pub bias: f64,
    pub source_quality: f64,
    pub issues: Vec<String>,
    pub verdict: Verdict,
    /// Citations that failed the reachability check
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreachable_sources: Vec<String>,
}

impl EvaluationResult {
    /// Synthetic accept used when red-team evaluation is disabled
    pub fn bypass() -> Self {
        Self {
            objectivity: 1.0,
            bias: 1.0,
            source_quality: 1.0,
            issues: Vec::new(),
            verdict: Verdict::Accept,
            unreachable_sources: Vec::new(),
        }
    }

    /// Stand-in for an evaluation that could not be completed
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            objectivity: 0.0,
            bias: 1.0,
            source_quality: 0.0,
            issues: vec![format!(
                "Red-team evaluation could not be completed ({}); review the draft for bias and unsupported claims",
                reason
            )],
            verdict: Verdict::Refine,
            unreachable_sources: Vec::new(),
        }
    }

    pub fn is_accept(&self) -> bool {
        self.verdict == Verdict::Accept
    }
}
