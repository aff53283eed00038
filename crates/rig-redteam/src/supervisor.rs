//! Multi-Agent Supervisor
//!
//! One pass turns a brief into a draft:
//!
//! 1. **Decompose**: one [`AgentTask`] per distinct sub-question, plus one per
//!    reviewer issue on refinement passes
//! 2. **Dispatch**: every task runs concurrently on a bounded pool; the pass
//!    waits for all of them
//! 3. **Aggregate**: findings in submission order, exact duplicates dropped
//! 4. **Synthesize**: the writer model drafts the body from the findings
//!
//! Decomposition and aggregation are pure functions so that ordering and
//! deduplication can be tested without running agents.

use futures::FutureExt;
use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use crate::llm::ModelClient;
use crate::prompts;
use crate::researcher::ResearchAgent;
use crate::state::{
    AgentResult, AgentStatus, AgentTask, DraftReport, EvaluationResult, Finding, Provenance,
    ResearchBrief,
};

/// Prefix of sub-questions derived from reviewer issues
pub const CONCERN_PREFIX: &str = "Address reviewer concern:";

/// Case-insensitive, whitespace-normalized form used to detect duplicate questions
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Critique carried into a refinement pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Guidance {
    pub issues: Vec<String>,
    /// Body of the draft being refined
    pub previous_body: Option<String>,
}

impl Guidance {
    pub fn new(issues: Vec<String>) -> Self {
        Self {
            issues,
            previous_body: None,
        }
    }

    pub fn from_critique(draft: &DraftReport, evaluation: &EvaluationResult) -> Self {
        Self {
            issues: evaluation.issues.clone(),
            previous_body: Some(draft.body.clone()),
        }
    }
}

/// Tasks for one pass, ids `task-1`, `task-2`, ... in submission order
pub fn decompose(brief: &ResearchBrief, guidance: Option<&Guidance>) -> Vec<AgentTask> {
    let context = brief.context();
    let derived = guidance
        .into_iter()
        .flat_map(|g| g.issues.iter())
        .filter(|issue| !issue.trim().is_empty())
        .map(|issue| format!("{} {}", CONCERN_PREFIX, issue.trim()));

    let mut seen = HashSet::new();
    brief
        .sub_questions
        .iter()
        .map(|q| q.trim().to_string())
        .chain(derived)
        .filter(|q| !q.is_empty() && seen.insert(normalize_question(q)))
        .enumerate()
        .map(|(i, question)| AgentTask {
            id: format!("task-{}", i + 1),
            question,
            context: context.clone(),
        })
        .collect()
}

/// Findings of one pass, merged
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub findings: Vec<Finding>,
    pub citations: BTreeSet<String>,
    pub provenance: Provenance,
}

/// Merge results given in submission order.
///
/// Fails only when every result failed; failed and partial task ids are kept
/// in the provenance.
pub fn aggregate(results: &[AgentResult]) -> Result<Aggregation, SupervisorError> {
    if results.is_empty() {
        return Err(SupervisorError::NoTasks);
    }

    let failed_task_ids: Vec<String> = results
        .iter()
        .filter(|r| r.is_failed())
        .map(|r| r.task_id.clone())
        .collect();

    if failed_task_ids.len() == results.len() {
        return Err(SupervisorError::AllAgentsFailed { failed_task_ids });
    }

    let partial_task_ids = results
        .iter()
        .filter(|r| r.status == AgentStatus::Partial)
        .map(|r| r.task_id.clone())
        .collect();

    let mut seen = HashSet::new();
    let findings: Vec<Finding> = results
        .iter()
        .filter(|r| !r.is_failed())
        .flat_map(|r| r.findings.iter())
        .filter(|f| seen.insert((f.claim.as_str(), f.source.as_str())))
        .cloned()
        .collect();

    let citations = findings.iter().map(|f| f.source.clone()).collect();

    Ok(Aggregation {
        findings,
        citations,
        provenance: Provenance {
            task_count: results.len(),
            failed_task_ids,
            partial_task_ids,
        },
    })
}

/// Findings as a markdown bullet list
pub fn render_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| format!("- {} ([source]({}))", f.claim, f.source))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Report body built without the writer model
fn fallback_body(objective: &str, aggregation: &Aggregation) -> String {
    let mut body = format!("# {}\n\n## Findings\n\n", objective);
    if aggregation.findings.is_empty() {
        body.push_str("No findings were returned for this objective.\n");
    } else {
        body.push_str(&render_findings(&aggregation.findings));
        body.push('\n');
    }

    if !aggregation.citations.is_empty() {
        body.push_str("\n## Sources\n\n");
        for source in &aggregation.citations {
            body.push_str(&format!("- {}\n", source));
        }
    }
    body
}

pub struct Supervisor {
    agent: Arc<dyn ResearchAgent>,
    writer: Option<ModelClient>,
    pool_size: Option<usize>,
}

impl Supervisor {
    pub fn new(agent: Arc<dyn ResearchAgent>) -> Self {
        Self {
            agent,
            writer: None,
            pool_size: None,
        }
    }

    /// Model used to write the report body; without one the body is a
    /// rendered list of findings.
    pub fn with_writer(mut self, writer: ModelClient) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Maximum concurrently running agents; `None` runs every task at once
    pub fn with_pool_size(mut self, pool_size: Option<usize>) -> Self {
        self.pool_size = pool_size.filter(|&n| n > 0);
        self
    }

    /// Run every task and return the results in submission order.
    ///
    /// Dropping the returned future aborts tasks still in flight.
    pub async fn dispatch(&self, tasks: Vec<AgentTask>) -> Vec<AgentResult> {
        let limit = self.pool_size.unwrap_or(tasks.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();

        info!(tasks = tasks.len(), pool_size = limit, "dispatching research tasks");

        let mut set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let agent = Arc::clone(&self.agent);
            let semaphore = Arc::clone(&semaphore);

            set.spawn(async move {
                let task_id = task.id.clone();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, AgentResult::failed(task_id, "agent pool closed"));
                };

                debug!(task = %task_id, question = %task.question, "research task started");
                let result = match AssertUnwindSafe(agent.execute(task)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => AgentResult::failed(&task_id, "research agent panicked"),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<AgentResult>> = vec![None; ids.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "research task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| slot.unwrap_or_else(|| AgentResult::failed(id, "research task did not complete")))
            .collect()
    }

    /// One full pass: decompose, dispatch, aggregate, synthesize
    pub async fn run(
        &self,
        brief: &ResearchBrief,
        guidance: Option<&Guidance>,
        iteration: u32,
    ) -> Result<DraftReport, SupervisorError> {
        let tasks = decompose(brief, guidance);
        if tasks.is_empty() {
            return Err(SupervisorError::NoTasks);
        }

        let results = self.dispatch(tasks).await;
        let aggregation = aggregate(&results)?;

        if !aggregation.provenance.failed_task_ids.is_empty() {
            warn!(
                failed = ?aggregation.provenance.failed_task_ids,
                "continuing with the surviving research tasks"
            );
        }

        let body = self.synthesize(brief, guidance, &aggregation).await;

        info!(
            iteration,
            findings = aggregation.findings.len(),
            citations = aggregation.citations.len(),
            "draft ready"
        );

        Ok(DraftReport {
            body,
            citations: aggregation.citations,
            iteration,
            findings: aggregation.findings,
            provenance: aggregation.provenance,
        })
    }

    async fn synthesize(
        &self,
        brief: &ResearchBrief,
        guidance: Option<&Guidance>,
        aggregation: &Aggregation,
    ) -> String {
        let Some(writer) = &self.writer else {
            return fallback_body(&brief.objective, aggregation);
        };

        let critique = guidance.map(|g| g.issues.as_slice()).unwrap_or_default();
        let previous = guidance.and_then(|g| g.previous_body.as_deref());
        let prompt = prompts::synthesis_prompt(
            &brief.objective,
            &render_findings(&aggregation.findings),
            previous,
            critique,
        );

        match writer.complete(prompts::SYNTHESIS_SYSTEM, &prompt).await {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => {
                warn!("writer returned an empty report, rendering findings instead");
                fallback_body(&brief.objective, aggregation)
            }
            Err(e) => {
                warn!(error = %e, "synthesis failed, rendering findings instead");
                fallback_body(&brief.objective, aggregation)
            }
        }
    }
}
