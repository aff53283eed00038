//! Entry point
//!
//! [`ResearchSystem`] holds the assembled pipeline; [`execute_main_process`]
//! runs it for one request and persists the report with its metadata, a
//! cleaned copy without unreachable citations and an executive summary.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LoopConfig;
use crate::controller::{RefinementController, RefinementOutcome};
use crate::error::{ConfigError, ProcessError, RefinementError};
use crate::evaluator::{BypassEvaluator, Evaluator, LinkValidator, RedTeamEvaluator};
use crate::llm::{LLMConfig, LLMProvider, ModelClient};
use crate::pricing::ModelPrice;
use crate::prompts;
use crate::report::{cap_summary, render_markdown, strip_unreachable_sources, RunLabels, RunMetadata};
use crate::researcher::{ResearchAgent, WebResearchAgent};
use crate::scoping::{Clarification, ScopingCoordinator};
use crate::search::SearchProvider;
use crate::supervisor::Supervisor;
use crate::usage::{CallKind, Component, UsageTracker};

pub const DEFAULT_OUTPUT_PATH: &str = "reports";
pub const DEFAULT_REPORT_PREFIX: &str = "research_report";

/// Model names per role
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSet {
    /// Scoping and report synthesis
    pub writer: LLMConfig,
    /// Query planning and finding extraction
    pub summarization: LLMConfig,
    pub evaluator: LLMConfig,
}

impl ModelSet {
    /// The same model for every role
    pub fn uniform(model: impl Into<String>) -> Self {
        let config = LLMConfig::new(model);
        Self {
            writer: config.clone(),
            summarization: config.clone(),
            evaluator: config,
        }
    }
}

/// The assembled pipeline for one run
pub struct ResearchSystem {
    config: LoopConfig,
    controller: RefinementController,
    usage: Arc<UsageTracker>,
    summarizer: Option<ModelClient>,
}

impl ResearchSystem {
    /// Assemble from explicit parts. With red-team evaluation disabled the
    /// given evaluator is replaced by [`BypassEvaluator`].
    pub fn new(
        config: LoopConfig,
        scoping: ScopingCoordinator,
        supervisor: Supervisor,
        evaluator: Arc<dyn Evaluator>,
        usage: Arc<UsageTracker>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let evaluator: Arc<dyn Evaluator> = if config.enable_red_team_eval {
            evaluator
        } else {
            info!("red-team evaluation disabled, drafts are accepted as written");
            Arc::new(BypassEvaluator)
        };

        let controller = RefinementController::new(
            scoping.with_best_effort(config.allow_best_effort_brief),
            supervisor.with_pool_size(config.agent_pool_size),
            evaluator,
            config.max_refinement_iterations,
        )
        .with_usage(Arc::clone(&usage));

        Ok(Self {
            config,
            controller,
            usage,
            summarizer: None,
        })
    }

    /// Write an executive summary next to every report
    pub fn with_summarizer(mut self, model: ModelClient) -> Self {
        self.summarizer = Some(model);
        self
    }

    /// Assemble the real pipeline over one completion provider and one
    /// search backend
    pub fn from_providers(
        config: LoopConfig,
        llm: Arc<dyn LLMProvider>,
        models: ModelSet,
        search: Arc<dyn SearchProvider>,
        usage: Arc<UsageTracker>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let retry = config.retry_policy();
        let client = |model: LLMConfig, component: Component| {
            ModelClient::new(Arc::clone(&llm), model, component, Arc::clone(&usage))
                .with_retry_policy(retry.clone())
                .with_call_timeout(config.call_timeout)
        };

        let writer = client(models.writer, Component::Scoping);
        let scoping = ScopingCoordinator::new(writer.clone());

        let agent: Arc<dyn ResearchAgent> = Arc::new(
            WebResearchAgent::new(
                search,
                client(models.summarization, Component::ResearchAgent),
                Arc::clone(&usage),
            )
            .with_retry_policy(retry.clone())
            .with_call_timeout(config.call_timeout)
            .with_max_searches(config.max_searches_per_agent)
            .with_results_per_query(config.search_results_per_query),
        );
        let supervisor = Supervisor::new(agent).with_writer(writer.for_component(Component::Supervisor));

        let mut evaluator = RedTeamEvaluator::new(client(models.evaluator, Component::Evaluator), config.thresholds());
        if config.validate_links {
            let validator = LinkValidator::new()
                .with_retry_policy(retry.clone())
                .with_timeout(config.call_timeout)
                .with_usage(Arc::clone(&usage));
            evaluator = evaluator.with_link_validator(validator);
        }

        let summarizer = writer.for_component(Component::Supervisor);
        Ok(Self::new(config, scoping, supervisor, Arc::new(evaluator), usage)?.with_summarizer(summarizer))
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Run the loop without persisting anything
    pub async fn refine(
        &self,
        query: &str,
        clarification: Option<&Clarification>,
        initial_report: Option<&str>,
    ) -> Result<RefinementOutcome, RefinementError> {
        self.controller.run(query, clarification, initial_report).await
    }

    /// Executive summary of the final draft. A failed summary is logged and
    /// skipped; the report stands on its own.
    async fn summarize(&self, query: &str, outcome: &RefinementOutcome) -> Option<String> {
        let model = self.summarizer.as_ref()?;
        let prompt = prompts::summary_prompt(query, &outcome.final_draft.body, &outcome.final_evaluation.issues);

        match model.complete(prompts::SUMMARY_SYSTEM, &prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(cap_summary(&text)),
            Ok(_) => {
                warn!("executive summary came back empty");
                None
            }
            Err(e) => {
                warn!(error = %e, "executive summary failed");
                None
            }
        }
    }

    /// Prices of every model that billed a completion so far
    fn prices_used(&self) -> Vec<(String, ModelPrice)> {
        let mut models: Vec<String> = self
            .usage
            .records()
            .into_iter()
            .filter(|r| r.kind == CallKind::Completion)
            .map(|r| r.label)
            .collect();
        models.sort();
        models.dedup();

        models
            .into_iter()
            .map(|model| {
                let price = self.usage.pricing().price_for(&model);
                (model, price)
            })
            .collect()
    }
}

/// One research request
#[derive(Debug, Clone, PartialEq)]
pub struct MainProcessRequest {
    pub query: String,
    pub clarification: Option<Clarification>,
    /// Existing report to evaluate and refine instead of researching from scratch
    pub initial_report: Option<String>,
    pub output_path: PathBuf,
    pub report_prefix: String,
    pub task_name: Option<String>,
    /// Report heading; defaults to the task name, then the query
    pub title: Option<String>,
}

impl MainProcessRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            clarification: None,
            initial_report: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            report_prefix: DEFAULT_REPORT_PREFIX.to_string(),
            task_name: None,
            title: None,
        }
    }

    pub fn with_clarification(mut self, clarification: Clarification) -> Self {
        self.clarification = Some(clarification);
        self
    }

    pub fn with_initial_report(mut self, report: impl Into<String>) -> Self {
        self.initial_report = Some(report.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_report_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.report_prefix = prefix.into();
        self
    }

    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = Some(name.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn resolved_title(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.task_name.clone())
            .unwrap_or_else(|| self.query.trim().to_string())
    }
}

/// What a successful run returns
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Final report body
    pub report: String,
    pub metadata: RunMetadata,
    pub outcome: RefinementOutcome,
    pub report_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Written when the final evaluation found unreachable citations
    pub cleaned_report_path: Option<PathBuf>,
    pub summary: Option<String>,
    pub summary_path: Option<PathBuf>,
}

/// Run the refinement loop for `request` and persist the result.
///
/// Configuration is validated before any external call. On a fatal loop
/// error nothing is written.
pub async fn execute_main_process(
    system: &ResearchSystem,
    request: MainProcessRequest,
) -> Result<ProcessOutcome, ProcessError> {
    system.config.validate()?;

    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id = %run_id, query = %request.query, enrichment = request.initial_report.is_some(), "research run started");

    let outcome = system
        .refine(
            &request.query,
            request.clarification.as_ref(),
            request.initial_report.as_deref(),
        )
        .await?;

    let summary = system.summarize(&request.query, &outcome).await;
    let unreachable = &outcome.final_evaluation.unreachable_sources;
    let cleaned = (!unreachable.is_empty()).then(|| strip_unreachable_sources(&outcome.final_draft.body, unreachable));

    // run id keeps runs started within the same second apart
    let short_id = run_id.split('-').next().unwrap_or(&run_id).to_string();
    let labels = RunLabels {
        run_id,
        title: request.resolved_title(),
        task_name: request.task_name.clone(),
        query: request.query.clone(),
        enrichment: request.initial_report.is_some(),
    };
    let metadata = RunMetadata::from_outcome(labels, &outcome, system.usage.summary(), system.config.clone());
    let prices = system.prices_used();
    let markdown = render_markdown(&metadata, &outcome.final_draft.body, &prices);

    let stem = format!(
        "{}_{}_{}",
        request.report_prefix,
        Utc::now().format("%Y%m%d_%H%M%S"),
        short_id
    );
    let report_path = request.output_path.join(format!("{stem}.md"));
    let metadata_path = request.output_path.join(format!("{stem}.json"));

    create_dir(&request.output_path).await?;
    write_file(&report_path, markdown.as_bytes()).await?;
    write_file(&metadata_path, serde_json::to_string_pretty(&metadata)?.as_bytes()).await?;

    let cleaned_report_path = match &cleaned {
        Some(body) => {
            let path = request.output_path.join(format!("{stem}_cleaned.md"));
            write_file(&path, render_markdown(&metadata, body, &prices).as_bytes()).await?;
            info!(path = %path.display(), removed = unreachable.len(), "cleaned report written");
            Some(path)
        }
        None => None,
    };

    let summary_path = match &summary {
        Some(text) => {
            let path = request.output_path.join(format!("{stem}_summary.md"));
            let page = format!("# {}: executive summary\n\n{}\n", metadata.title, text);
            write_file(&path, page.as_bytes()).await?;
            Some(path)
        }
        None => None,
    };

    info!(
        report = %report_path.display(),
        terminal = ?metadata.terminal,
        iterations = metadata.iterations,
        cost_usd = metadata.usage.total.cost_usd,
        "research run finished"
    );

    Ok(ProcessOutcome {
        report: outcome.final_draft.body.clone(),
        metadata,
        outcome,
        report_path,
        metadata_path,
        cleaned_report_path,
        summary,
        summary_path,
    })
}

async fn create_dir(path: &Path) -> Result<(), ProcessError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| ProcessError::Persist {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ProcessError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| ProcessError::Persist {
            path: path.to_path_buf(),
            source,
        })
}
