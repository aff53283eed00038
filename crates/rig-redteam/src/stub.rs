//! Deterministic capability doubles
//!
//! Each type implements the same trait as its real counterpart, so a
//! pipeline can be assembled from any mix of real and scripted parts.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{EvaluationError, LlmError, SearchError};
use crate::evaluator::{Evaluator, Scores, Thresholds};
use crate::llm::{LLMConfig, LLMProvider, LLMResponse, Message};
use crate::researcher::ResearchAgent;
use crate::search::{SearchHit, SearchProvider};
use crate::state::{AgentResult, AgentStatus, AgentTask, DraftReport, EvaluationResult, Finding};
use crate::supervisor::normalize_question;
use crate::tokens::ApproxTokenCounter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// LLM
// =============================================================================

struct Rule {
    needle: String,
    replies: VecDeque<Result<String, LlmError>>,
}

impl Rule {
    /// Next reply; the last one repeats forever
    fn next_reply(&mut self) -> Result<String, LlmError> {
        if self.replies.len() > 1 {
            if let Some(reply) = self.replies.pop_front() {
                return reply;
            }
        }
        self.replies
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Completion provider answering from substring rules.
///
/// The first rule whose needle occurs in the conversation text answers.
/// Clones share rules and counters.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    rules: Arc<Mutex<Vec<Rule>>>,
    fallback: Option<String>,
    latency: Option<Duration>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `reply` when `needle` is present
    pub fn on(self, needle: &str, reply: &str) -> Self {
        self.on_sequence(needle, vec![Ok(reply.to_string())])
    }

    /// Answer successive calls from `replies`, repeating the last one
    pub fn on_sequence(self, needle: &str, replies: Vec<Result<String, LlmError>>) -> Self {
        lock(&self.rules).push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Always fail with `error` when `needle` is present
    pub fn fail_on(self, needle: &str, error: LlmError) -> Self {
        self.on_sequence(needle, vec![Err(error)])
    }

    /// Reply for conversations no rule matches
    pub fn with_fallback(mut self, reply: &str) -> Self {
        self.fallback = Some(reply.to_string());
        self
    }

    /// Hold every reply for `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every conversation seen, system and user text joined
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[Message],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        lock(&self.prompts).push(text.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = {
            let mut rules = lock(&self.rules);
            match rules.iter_mut().find(|rule| text.contains(&rule.needle)) {
                Some(rule) => rule.next_reply(),
                None => self.fallback.clone().ok_or_else(|| LlmError::Provider {
                    provider: "scripted".to_string(),
                    message: "no scripted reply for this prompt".to_string(),
                }),
            }
        }?;

        let model = config.map(|c| c.model.as_str()).unwrap_or("scripted");
        let usage = ApproxTokenCounter::for_model(model).estimate_usage(messages, &reply);
        Ok(LLMResponse::new(Message::assistant(reply)).with_usage(usage))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// SEARCH
// =============================================================================

struct FailureRule {
    needle: String,
    error: SearchError,
    remaining: Option<usize>,
}

/// Search provider returning canned hits
#[derive(Clone, Default)]
pub struct StaticSearch {
    default_hits: Vec<SearchHit>,
    by_query: Vec<(String, Vec<SearchHit>)>,
    failures: Arc<Mutex<Vec<FailureRule>>>,
    latency: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticSearch {
    pub fn new(default_hits: Vec<SearchHit>) -> Self {
        Self {
            default_hits,
            ..Default::default()
        }
    }

    /// Hits for queries containing `needle`
    pub fn with_hits(mut self, needle: &str, hits: Vec<SearchHit>) -> Self {
        self.by_query.push((needle.to_string(), hits));
        self
    }

    /// Every query containing `needle` fails
    pub fn fail_on(self, needle: &str, error: SearchError) -> Self {
        lock(&self.failures).push(FailureRule {
            needle: needle.to_string(),
            error,
            remaining: None,
        });
        self
    }

    /// The first `times` queries containing `needle` fail
    pub fn flaky(self, needle: &str, times: usize, error: SearchError) -> Self {
        lock(&self.failures).push(FailureRule {
            needle: needle.to_string(),
            error,
            remaining: Some(times),
        });
        self
    }

    /// Hold every answer for `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut failures = lock(&self.failures);
            for rule in failures.iter_mut().filter(|r| query.contains(&r.needle)) {
                match rule.remaining.as_mut() {
                    None => return Err(rule.error.clone()),
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        return Err(rule.error.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        let hits = self
            .by_query
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, hits)| hits.clone())
            .unwrap_or_else(|| self.default_hits.clone());

        Ok(hits.into_iter().take(k).collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

// =============================================================================
// RESEARCH AGENT
// =============================================================================

#[derive(Clone)]
struct Outcome {
    status: AgentStatus,
    findings: Vec<Finding>,
    error: Option<String>,
}

/// Research agent with fixed outcomes per question.
///
/// Unscripted questions succeed with one finding whose source is derived
/// from the question text. Tracks peak concurrency.
#[derive(Default)]
pub struct ScriptedResearcher {
    outcomes: HashMap<String, Outcome>,
    delays: HashMap<String, Duration>,
    fail_all: Option<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    executed: Mutex<Vec<AgentTask>>,
}

impl ScriptedResearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, question: &str, status: AgentStatus, findings: Vec<Finding>) -> Self {
        let error = (status != AgentStatus::Ok).then(|| format!("scripted {:?} outcome", status));
        self.outcomes.insert(
            normalize_question(question),
            Outcome {
                status,
                findings,
                error,
            },
        );
        self
    }

    pub fn failing(mut self, question: &str, reason: &str) -> Self {
        self.outcomes.insert(
            normalize_question(question),
            Outcome {
                status: AgentStatus::Failed,
                findings: Vec::new(),
                error: Some(reason.to_string()),
            },
        );
        self
    }

    /// Every task fails with `reason`
    pub fn fail_all(mut self, reason: &str) -> Self {
        self.fail_all = Some(reason.to_string());
        self
    }

    /// Hold the task for `delay` before answering
    pub fn with_delay(mut self, question: &str, delay: Duration) -> Self {
        self.delays.insert(normalize_question(question), delay);
        self
    }

    /// Highest number of tasks observed executing at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<AgentTask> {
        lock(&self.executed).clone()
    }

    /// Finding produced for an unscripted question
    pub fn default_finding(question: &str) -> Finding {
        let slug: String = normalize_question(question)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        Finding::new(
            format!("Evidence for: {}", question.trim()),
            format!("https://example.org/{}", slug.trim_matches('-')),
        )
    }
}

#[async_trait]
impl ResearchAgent for ScriptedResearcher {
    async fn execute(&self, task: AgentTask) -> AgentResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let key = normalize_question(&task.question);
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        let result = if let Some(reason) = &self.fail_all {
            AgentResult::failed(&task.id, reason.clone())
        } else {
            match self.outcomes.get(&key) {
                Some(outcome) => AgentResult {
                    task_id: task.id.clone(),
                    findings: outcome.findings.clone(),
                    status: outcome.status,
                    error: outcome.error.clone(),
                },
                None => AgentResult::ok(&task.id, vec![Self::default_finding(&task.question)]),
            }
        };

        lock(&self.executed).push(task);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Evaluator scoring drafts from a per-iteration table.
///
/// Iteration `i` gets `scores[i]` (the last row repeats). The verdict and
/// dimension issues come from the same [`Thresholds`] logic as the real
/// evaluator, so the result depends only on the draft.
pub struct ScriptedEvaluator {
    thresholds: Thresholds,
    scores: Vec<Scores>,
    failing_iterations: HashSet<u32>,
    unreachable: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedEvaluator {
    pub fn new(thresholds: Thresholds, scores: Vec<Scores>) -> Self {
        Self {
            thresholds,
            scores,
            failing_iterations: HashSet::new(),
            unreachable: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Evaluating a draft of this iteration returns an `EvaluationError`
    pub fn failing_at(mut self, iteration: u32) -> Self {
        self.failing_iterations.insert(iteration);
        self
    }

    /// Report these citations as unreachable whenever a draft cites them
    pub fn with_unreachable(mut self, urls: &[&str]) -> Self {
        self.unreachable = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, draft: &DraftReport) -> Result<EvaluationResult, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_iterations.contains(&draft.iteration) {
            return Err(EvaluationError::Other(format!(
                "scripted failure at iteration {}",
                draft.iteration
            )));
        }

        let index = (draft.iteration as usize).min(self.scores.len().saturating_sub(1));
        let scores = self
            .scores
            .get(index)
            .copied()
            .unwrap_or(Scores::new(1.0, 0.0, 1.0));

        let mut result = self.thresholds.assess(scores, Vec::new());
        result.unreachable_sources = self
            .unreachable
            .iter()
            .filter(|url| draft.citations.contains(*url))
            .cloned()
            .collect();
        Ok(result)
    }
}
