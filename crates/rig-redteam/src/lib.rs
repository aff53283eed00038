//! Multi-agent deep research with an adversarial refinement loop
//!
//! A query is scoped into a [`ResearchBrief`], researched by parallel
//! agents under a [`Supervisor`], scored by a red-team [`Evaluator`] and
//! refined until a draft is accepted or the budget runs out.
//!
//! ```text
//! query ─▶ ScopingCoordinator ─▶ brief ─▶ RefinementController
//!                                              │
//!                      ┌───────────────────────┘
//!                      ▼
//!                 Supervisor ──▶ ResearchAgent × N (parallel)
//!                      │
//!                    draft ──▶ Evaluator ──▶ accept │ refine (critique → guidance)
//! ```
//!
//! Every external call goes through a capability trait ([`LLMProvider`],
//! [`SearchProvider`], [`ResearchAgent`], [`Evaluator`]) and is recorded
//! in the shared [`UsageTracker`]. Deterministic doubles live in [`stub`].

pub mod config;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod llm;
pub mod pricing;
pub mod process;
pub mod prompts;
pub mod report;
pub mod researcher;
pub mod retry;
pub mod scoping;
pub mod search;
pub mod state;
pub mod stub;
pub mod supervisor;
pub mod tokens;
pub mod usage;

pub use config::LoopConfig;
pub use controller::{next_phase, EvaluatedDraft, Event, Phase, RefinementController, RefinementOutcome, Terminal};
pub use error::{
    ConfigError, EvaluationError, FatalCause, LlmError, ProcessError, RefinementError, ScopingError, SearchError,
    Stage, SupervisorError,
};
pub use evaluator::{BypassEvaluator, Evaluator, LinkValidator, RedTeamEvaluator, Scores, Thresholds};
pub use llm::{AnthropicProvider, LLMConfig, LLMProvider, ModelClient, OllamaProvider, OpenAIProvider};
pub use pricing::{ModelPrice, PricingTable};
pub use process::{execute_main_process, MainProcessRequest, ModelSet, ProcessOutcome, ResearchSystem};
pub use report::RunMetadata;
pub use researcher::{ResearchAgent, WebResearchAgent};
pub use retry::RetryPolicy;
pub use scoping::{Clarification, ScopingCoordinator};
pub use search::{DuckDuckGoSearch, SearchHit, SearchProvider, TavilySearch};
pub use state::{AgentResult, AgentStatus, AgentTask, DraftReport, EvaluationResult, Finding, ResearchBrief, Verdict};
pub use supervisor::{Guidance, Supervisor};
pub use usage::{CallKind, Component, UsageSummary, UsageTracker};
