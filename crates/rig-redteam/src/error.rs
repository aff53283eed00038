//! Error types
//!
//! One enum per concern. Capability errors (`LlmError`, `SearchError`) know
//! whether a retry can help; the loop-level errors carry enough context for a
//! caller to decide whether to run again.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryableError;

/// Failures of the LLM completion service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unauthorized - check API key for {provider}")]
    Unauthorized { provider: String },

    #[error("{provider} completion failed: {message}")]
    Provider { provider: String, message: String },
}

impl LlmError {
    /// Classify a provider error message the way the HTTP layer reports it
    pub fn from_provider(provider: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();

        if lowered.contains("429") || lowered.contains("rate limit") {
            LlmError::RateLimited {
                provider: provider.to_string(),
            }
        } else if lowered.contains("401")
            || lowered.contains("unauthorized")
            || lowered.contains("invalid api key")
            || lowered.contains("invalid x-api-key")
        {
            LlmError::Unauthorized {
                provider: provider.to_string(),
            }
        } else {
            LlmError::Provider {
                provider: provider.to_string(),
                message,
            }
        }
    }
}

impl RetryableError for LlmError {
    fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::Unauthorized { .. })
    }

    fn timed_out(after: Duration) -> Self {
        LlmError::Timeout(after)
    }
}

/// Failures of the web search service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl SearchError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else if e.is_connect() {
            SearchError::Connection(e.to_string())
        } else {
            SearchError::Network(e.to_string())
        }
    }

    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => SearchError::Unauthorized,
            429 => SearchError::RateLimited,
            400 => SearchError::BadRequest(body),
            500..=599 => SearchError::ServerError(status, body),
            _ => SearchError::HttpError(status, body),
        }
    }
}

impl RetryableError for SearchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout
                | SearchError::Connection(_)
                | SearchError::RateLimited
                | SearchError::ServerError(_, _)
        )
    }

    fn timed_out(_after: Duration) -> Self {
        SearchError::Timeout
    }
}

/// The Scoping Coordinator could not produce a usable brief
#[derive(Error, Debug)]
pub enum ScopingError {
    #[error("Query is too ambiguous to derive any sub-question: {query:?}")]
    AmbiguousQuery { query: String },

    #[error("Brief drafting failed: {0}")]
    Llm(#[from] LlmError),
}

/// Supervisor pass failures that void the whole pass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupervisorError {
    #[error("All {} research agents failed: {}", .failed_task_ids.len(), .failed_task_ids.join(", "))]
    AllAgentsFailed { failed_task_ids: Vec<String> },

    #[error("Brief produced no research tasks")]
    NoTasks,
}

/// The evaluator could not score a draft
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("{dimension} analysis failed: {source}")]
    Rubric {
        dimension: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("Evaluation failed: {0}")]
    Other(String),
}

/// Invalid or missing configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("{name} has invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Loop stage at which a fatal error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configuration,
    Scoping,
    Researching,
    Evaluating,
    Refining,
    /// The loop had already reached a terminal phase
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::Scoping => "scoping",
            Stage::Researching => "researching",
            Stage::Evaluating => "evaluating",
            Stage::Refining => "refining",
            Stage::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Root cause of a loop that ended in `Errored`
#[derive(Error, Debug)]
pub enum FatalCause {
    #[error(transparent)]
    Scoping(#[from] ScopingError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("illegal transition from {from} on {event}")]
    IllegalTransition { from: String, event: String },
}

/// Fatal refinement-loop error with the stage and iteration reached
#[derive(Error, Debug)]
#[error("{stage} failed at iteration {iteration}: {cause}")]
pub struct RefinementError {
    pub stage: Stage,
    pub iteration: u32,
    /// Number of drafts that had been evaluated before the failure
    pub evaluated_drafts: usize,
    #[source]
    pub cause: FatalCause,
}

impl RefinementError {
    pub fn new(stage: Stage, iteration: u32, cause: impl Into<FatalCause>) -> Self {
        Self {
            stage,
            iteration,
            evaluated_drafts: 0,
            cause: cause.into(),
        }
    }

    pub fn with_evaluated_drafts(mut self, count: usize) -> Self {
        self.evaluated_drafts = count;
        self
    }

    /// True when every research agent of a pass failed
    pub fn is_all_agents_failed(&self) -> bool {
        matches!(
            self.cause,
            FatalCause::Supervisor(SupervisorError::AllAgentsFailed { .. })
        )
    }
}

/// Entry-point failures
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Refinement(#[from] RefinementError),

    #[error("Failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
