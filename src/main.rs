//! # Red-Team Research
//!
//! Command-line front end for the multi-agent research pipeline:
//! - A scoping model turns the query into a research brief
//! - Parallel research agents search the web and extract cited findings
//! - A red-team reviewer scores the draft for objectivity, bias and sources
//! - The draft is refined until it passes or the iteration budget runs out
//!
//! The report and its run metadata are written to `--output-path`.
//!
//! ## Quick Start
//! ```bash
//! OPENAI_API_KEY=... TAVILY_API_KEY=... \
//!   cargo run -- "Are residential heat pumps worth it in cold climates?"
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Provider, model and API key configuration
mod config;

/// Building the research pipeline from configuration
mod setup;

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rig_redteam::process::{DEFAULT_OUTPUT_PATH, DEFAULT_REPORT_PREFIX};
use rig_redteam::{execute_main_process, Clarification, MainProcessRequest, ProcessError, Terminal};

use crate::config::AppConfig;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "redteam-research",
    version,
    about = "Multi-agent research reports refined by an adversarial red-team reviewer",
    long_about = r#"
Researches a question with parallel web-search agents, then has a red-team
reviewer score the draft for objectivity, bias and source quality. Drafts
that miss a threshold are refined with the reviewer's critique until one
passes or the iteration budget runs out; the best draft is kept either way.

CONFIGURATION (environment or .env):
  LLM_PROVIDER        openai | anthropic | ollama (default: openai)
  WRITER_MODEL, SUMMARIZATION_MODEL, EVALUATOR_MODEL
  SEARCH_PROVIDER     tavily | duckduckgo (default: tavily)
  MIN_OBJECTIVITY_SCORE, MAX_BIAS_SCORE, MIN_SOURCE_QUALITY_SCORE
  MAX_REFINEMENT_ITERATIONS, ENABLE_RED_TEAM_EVAL, AGENT_POOL_SIZE
  REPORT_OUTPUT_PATH, REPORT_PREFIX

EXAMPLES:
  redteam-research "Are heat pumps worth it in cold climates?"

  # Improve an existing report instead of starting from scratch
  redteam-research --initial-report draft.md "Are heat pumps worth it?"

  # Single pass, no reviewer
  redteam-research --no-red-team --query-file question.txt
"#
)]
struct Args {
    /// The research question
    #[arg(value_name = "QUERY", required_unless_present = "query_file")]
    query: Option<String>,

    /// Read the research question from a file
    #[arg(long, value_name = "PATH", conflicts_with = "query")]
    query_file: Option<PathBuf>,

    /// Existing report to evaluate and refine
    #[arg(long, value_name = "PATH")]
    initial_report: Option<PathBuf>,

    /// Extra context answering what the question leaves open
    #[arg(long, value_name = "TEXT")]
    clarification: Option<String>,

    /// Directory for the report and its metadata
    #[arg(long, value_name = "DIR", env = "REPORT_OUTPUT_PATH", default_value = DEFAULT_OUTPUT_PATH)]
    output_path: PathBuf,

    #[arg(long, value_name = "PREFIX", env = "REPORT_PREFIX", default_value = DEFAULT_REPORT_PREFIX)]
    report_prefix: String,

    /// Name recorded in the report header and metadata
    #[arg(long, value_name = "NAME")]
    task_name: Option<String>,

    /// Refinement budget (overrides MAX_REFINEMENT_ITERATIONS)
    #[arg(long, value_name = "N")]
    max_iterations: Option<u32>,

    /// Accept the first draft without red-team evaluation
    #[arg(long)]
    no_red_team: bool,

    /// Maximum concurrent research agents (overrides AGENT_POOL_SIZE)
    #[arg(long, value_name = "N")]
    pool_size: Option<usize>,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads env-backed arguments
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate()?;

    let mut loop_config = config.loop_config.clone();
    if let Some(max) = args.max_iterations {
        loop_config = loop_config.with_max_refinement_iterations(max);
    }
    if args.no_red_team {
        loop_config = loop_config.with_red_team_eval(false);
    }
    if args.pool_size.is_some() {
        loop_config = loop_config.with_agent_pool_size(args.pool_size);
    }

    let request = build_request(&args).await?;
    let system = setup::build_system(&config, loop_config)?;

    info!(
        output = %request.output_path.display(),
        max_iterations = system.config().max_refinement_iterations,
        red_team = system.config().enable_red_team_eval,
        "starting research"
    );

    match execute_main_process(&system, request).await {
        Ok(outcome) => {
            let metadata = &outcome.metadata;
            let verdict = match metadata.terminal {
                Terminal::Accepted => "ACCEPTED",
                Terminal::Exhausted => "EXHAUSTED (best draft kept)",
            };

            println!("\n{}", "=".repeat(60));
            println!("Verdict:     {verdict}");
            println!("Iterations:  {}", metadata.iterations);
            println!(
                "Scores:      objectivity {:.2}, bias {:.2}, source quality {:.2}",
                metadata.final_scores.objectivity, metadata.final_scores.bias, metadata.final_scores.source_quality
            );
            println!("Cost:        ${:.4}", metadata.usage.total.cost_usd);
            println!("Report:      {}", outcome.report_path.display());
            println!("Metadata:    {}", outcome.metadata_path.display());
            if let Some(path) = &outcome.cleaned_report_path {
                println!("Cleaned:     {}", path.display());
            }
            if let Some(path) = &outcome.summary_path {
                println!("Summary:     {}", path.display());
            }
            println!("{}", "=".repeat(60));
            Ok(())
        }
        Err(ProcessError::Refinement(e)) => {
            error!(stage = %e.stage, iteration = e.iteration, error = %e.cause, "research failed");
            eprintln!(
                "\nResearch failed during {} at iteration {} ({} draft(s) evaluated): {}",
                e.stage, e.iteration, e.evaluated_drafts, e.cause
            );
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "research failed");
            Err(e.into())
        }
    }
}

/// Resolve file arguments into a request
async fn build_request(args: &Args) -> Result<MainProcessRequest> {
    let query = match (&args.query, &args.query_file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read query file {}", path.display()))?,
        (None, None) => bail!("a query or --query-file is required"),
    };
    if query.trim().is_empty() {
        bail!("the research question is empty");
    }

    let mut request = MainProcessRequest::new(query.trim())
        .with_output_path(&args.output_path)
        .with_report_prefix(&args.report_prefix);

    if let Some(path) = &args.initial_report {
        let report = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read initial report {}", path.display()))?;
        request = request.with_initial_report(report);
    }
    if let Some(text) = &args.clarification {
        request = request.with_clarification(Clarification::new("What should the research focus on?", text));
    }
    if let Some(name) = &args.task_name {
        request = request.with_task_name(name);
    }

    Ok(request)
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// `RUST_LOG` decides the filter unless `--verbose` forces debug. Logs go to
/// stderr so stdout carries only the run summary.
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["test", "Are heat pumps worth it?"]);
        assert_eq!(args.query.as_deref(), Some("Are heat pumps worth it?"));
        assert_eq!(args.output_path, PathBuf::from("reports"));
        assert_eq!(args.report_prefix, "research_report");
        assert!(!args.no_red_team);
        assert!(args.max_iterations.is_none());
    }

    #[test]
    fn test_args_with_flags() {
        let args = Args::parse_from([
            "test",
            "--no-red-team",
            "--max-iterations",
            "5",
            "--pool-size",
            "2",
            "--task-name",
            "heat-pumps",
            "--verbose",
            "Test query",
        ]);

        assert!(args.no_red_team);
        assert!(args.verbose);
        assert_eq!(args.max_iterations, Some(5));
        assert_eq!(args.pool_size, Some(2));
        assert_eq!(args.task_name.as_deref(), Some("heat-pumps"));
    }

    #[test]
    fn test_query_or_file_required() {
        assert!(Args::try_parse_from(["test"]).is_err());
        let args = Args::try_parse_from(["test", "--query-file", "q.txt"]).unwrap();
        assert_eq!(args.query_file, Some(PathBuf::from("q.txt")));
    }

    #[tokio::test]
    async fn test_request_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let query_path = dir.path().join("q.txt");
        let report_path = dir.path().join("draft.md");
        std::fs::write(&query_path, "  Are heat pumps worth it?\n").unwrap();
        std::fs::write(&report_path, "# Draft").unwrap();

        let args = Args::parse_from([
            "test".to_string(),
            "--query-file".to_string(),
            query_path.display().to_string(),
            "--initial-report".to_string(),
            report_path.display().to_string(),
            "--clarification".to_string(),
            "EU only".to_string(),
        ]);
        let request = build_request(&args).await.unwrap();

        assert_eq!(request.query, "Are heat pumps worth it?");
        assert_eq!(request.initial_report.as_deref(), Some("# Draft"));
        assert_eq!(request.clarification.map(|c| c.answer), Some("EU only".to_string()));
    }
}
