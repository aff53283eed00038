//! Integration Tests for execute_main_process
//!
//! Covers the persisted artifacts of a run:
//! - Markdown report and JSON metadata written side by side
//! - Exhausted runs flagged in both files
//! - Nothing written on a fatal error
//! - Cleaned report and executive summary beside the main report
//! - The real pipeline assembled from a scripted model and static search

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rig_redteam::evaluator::{Scores, Thresholds};
use rig_redteam::stub::{ScriptedEvaluator, ScriptedLlm, ScriptedResearcher, StaticSearch};
use rig_redteam::{
    execute_main_process, CallKind, Component, LLMConfig, LoopConfig, MainProcessRequest, ModelClient, ModelSet,
    ProcessError, ResearchSystem, RetryPolicy, RunMetadata, ScopingCoordinator, SearchHit, Supervisor, Terminal,
    UsageTracker,
};

const BRIEF_JSON: &str = r#"{
    "objective": "Assess residential heat pumps",
    "sub_questions": ["How efficient are heat pumps?", "What do heat pumps cost to install?"]
}"#;

const SUMMARY: &str = "Heat pumps pay off in most EU climates; cold-climate running costs remain the open question.";

const RUBRIC_REPLIES: [(&str, &str); 3] = [
    (
        "one_sided_score",
        r#"{"one_sided_score": 0.1, "source_diversity_score": 0.9, "quantitative_ratio": 0.8}"#,
    ),
    ("source_credibility_score", r#"{"source_credibility_score": 0.9, "weak_sources": []}"#),
    ("unsupported_claims", r#"{"unsupported_claims": [], "missing_counter_evidence": []}"#),
];

fn scripted_rubric() -> ScriptedLlm {
    RUBRIC_REPLIES
        .iter()
        .fold(ScriptedLlm::new(), |llm, (needle, reply)| llm.on(needle, reply))
}

fn summarizer(llm: ScriptedLlm, usage: &Arc<UsageTracker>) -> ModelClient {
    ModelClient::new(Arc::new(llm), LLMConfig::new("gpt-4o"), Component::Supervisor, Arc::clone(usage))
        .with_retry_policy(RetryPolicy::no_retry())
}

fn system(agent: ScriptedResearcher, scores: Vec<Scores>, config: LoopConfig) -> ResearchSystem {
    system_with(agent, ScriptedEvaluator::new(Thresholds::default(), scores), config, None)
}

fn system_with(
    agent: ScriptedResearcher,
    evaluator: ScriptedEvaluator,
    config: LoopConfig,
    summary_llm: Option<ScriptedLlm>,
) -> ResearchSystem {
    let usage = Arc::new(UsageTracker::new());
    let scoping_model = ModelClient::new(
        Arc::new(ScriptedLlm::new().on("sub_questions", BRIEF_JSON)),
        LLMConfig::new("gpt-4o"),
        Component::Scoping,
        Arc::clone(&usage),
    )
    .with_retry_policy(RetryPolicy::no_retry());

    let system = ResearchSystem::new(
        config,
        ScopingCoordinator::new(scoping_model),
        Supervisor::new(Arc::new(agent)),
        Arc::new(evaluator),
        Arc::clone(&usage),
    )
    .unwrap();

    match summary_llm {
        Some(llm) => system.with_summarizer(summarizer(llm, &usage)),
        None => system,
    }
}

#[tokio::test]
async fn test_writes_report_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let system = system(
        ScriptedResearcher::new(),
        vec![Scores::new(0.9, 0.1, 0.9)],
        LoopConfig::default(),
    );

    let request = MainProcessRequest::new("Are heat pumps worth it?")
        .with_output_path(dir.path())
        .with_report_prefix("heat_pumps")
        .with_task_name("heat-pump-review");
    let result = execute_main_process(&system, request).await.unwrap();

    let report_name = result.report_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(report_name.starts_with("heat_pumps_"));
    assert!(report_name.ends_with(".md"));
    assert_eq!(result.report_path.with_extension("json"), result.metadata_path);

    let markdown = std::fs::read_to_string(&result.report_path).unwrap();
    assert!(markdown.starts_with("# heat-pump-review"));
    assert!(markdown.contains("**Query:** Are heat pumps worth it?"));
    assert!(markdown.contains("## Usage Statistics"));
    assert!(markdown.contains("**Final verdict:** ACCEPTED"));
    assert!(markdown.trim_end().ends_with(result.report.trim_end()));

    let json = std::fs::read_to_string(&result.metadata_path).unwrap();
    let metadata: RunMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(metadata, result.metadata);
    assert_eq!(metadata.terminal, Terminal::Accepted);
    assert!(!metadata.exhausted);
    assert_eq!(metadata.per_iteration.len(), 1);
    assert_eq!(metadata.citations.len(), 2);
    assert_eq!(metadata.usage.component(Component::Scoping).calls, 1);

    assert!(result.cleaned_report_path.is_none());
    assert!(result.summary_path.is_none());
}

#[tokio::test]
async fn test_runs_in_the_same_second_do_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let system = system(
        ScriptedResearcher::new(),
        vec![Scores::new(0.9, 0.1, 0.9)],
        LoopConfig::default(),
    );
    let request = MainProcessRequest::new("Are heat pumps worth it?")
        .with_output_path(dir.path())
        .with_report_prefix("heat_pumps");

    let first = execute_main_process(&system, request.clone()).await.unwrap();
    let second = execute_main_process(&system, request).await.unwrap();

    assert_ne!(first.report_path, second.report_path);
    assert!(first.report_path.exists());
    assert!(second.report_path.exists());

    let short_id = first.metadata.run_id.split('-').next().unwrap().to_string();
    let stem = first.report_path.file_stem().unwrap().to_string_lossy().to_string();
    assert!(stem.ends_with(&short_id));
}

#[tokio::test]
async fn test_cleaned_report_and_summary_written_beside_report() {
    let dir = tempfile::tempdir().unwrap();
    let dead = "https://dead.example/installs";
    let evaluator = ScriptedEvaluator::new(Thresholds::default(), vec![Scores::new(0.9, 0.1, 0.9)])
        .with_unreachable(&[dead]);
    let summary_llm = ScriptedLlm::new().on("Write the executive summary now", SUMMARY);
    let system = system_with(
        ScriptedResearcher::new(),
        evaluator,
        LoopConfig::default(),
        Some(summary_llm.clone()),
    );

    let initial = "# Heat pumps\n\
                   Installs doubled in 2023 (https://dead.example/installs).\n\
                   Running costs fell ([IEA](https://iea.example/costs)).\n\
                   \n\
                   ## Sources\n\
                   - https://iea.example/costs\n\
                   - https://dead.example/installs\n";
    let request = MainProcessRequest::new("Are heat pumps worth it?")
        .with_output_path(dir.path())
        .with_task_name("heat-pump-review")
        .with_initial_report(initial);
    let result = execute_main_process(&system, request).await.unwrap();

    assert_eq!(result.outcome.final_evaluation.unreachable_sources, vec![dead]);

    let report = std::fs::read_to_string(&result.report_path).unwrap();
    assert!(report.contains(dead));

    let cleaned_path = result.cleaned_report_path.clone().unwrap();
    assert!(cleaned_path.to_string_lossy().ends_with("_cleaned.md"));
    let cleaned = std::fs::read_to_string(&cleaned_path).unwrap();
    assert!(!cleaned.contains(dead));
    assert!(cleaned.contains("Installs doubled in 2023."));
    assert!(cleaned.contains("- https://iea.example/costs"));

    assert_eq!(result.summary.as_deref(), Some(SUMMARY));
    let summary = std::fs::read_to_string(result.summary_path.unwrap()).unwrap();
    assert!(summary.starts_with("# heat-pump-review: executive summary"));
    assert!(summary.contains(SUMMARY));

    // the summary saw the final report and is billed like any completion
    assert!(summary_llm.prompts()[0].contains("Running costs fell"));
    assert_eq!(result.metadata.usage.component(Component::Supervisor).calls, 1);
}

#[tokio::test]
async fn test_failed_summary_keeps_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let system = system_with(
        ScriptedResearcher::new(),
        ScriptedEvaluator::new(Thresholds::default(), vec![Scores::new(0.9, 0.1, 0.9)]),
        LoopConfig::default(),
        Some(ScriptedLlm::new()),
    );

    let request = MainProcessRequest::new("Are heat pumps worth it?").with_output_path(dir.path());
    let result = execute_main_process(&system, request).await.unwrap();

    assert!(result.report_path.exists());
    assert!(result.summary.is_none());
    assert!(result.summary_path.is_none());
}

#[tokio::test]
async fn test_exhausted_run_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let system = system(
        ScriptedResearcher::new(),
        vec![Scores::new(0.5, 0.5, 0.5)],
        LoopConfig::default().with_max_refinement_iterations(2),
    );

    let request = MainProcessRequest::new("Are heat pumps worth it?").with_output_path(dir.path());
    let result = execute_main_process(&system, request).await.unwrap();

    assert!(result.metadata.exhausted);
    assert_eq!(result.metadata.iterations, 2);
    assert_eq!(result.metadata.per_iteration.len(), 3);

    let markdown = std::fs::read_to_string(&result.report_path).unwrap();
    assert!(markdown.contains("**Final verdict:** EXHAUSTED"));
    assert!(markdown.contains("### Iteration 2 issues"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result.metadata_path).unwrap()).unwrap();
    assert_eq!(json["exhausted"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn test_enrichment_request_marks_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let system = system(
        ScriptedResearcher::new(),
        vec![Scores::new(0.9, 0.1, 0.9)],
        LoopConfig::default(),
    );

    let request = MainProcessRequest::new("Are heat pumps worth it?")
        .with_output_path(dir.path())
        .with_initial_report("Heat pumps cut heating emissions (https://energy.example/report).");
    let result = execute_main_process(&system, request).await.unwrap();

    assert!(result.metadata.enrichment);
    assert_eq!(result.metadata.usage.component(Component::Scoping).calls, 0);
    assert_eq!(result.metadata.citations, vec!["https://energy.example/report"]);
}

#[tokio::test]
async fn test_fatal_error_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("reports");
    let system = system(
        ScriptedResearcher::new().fail_all("search backend down"),
        vec![Scores::new(0.9, 0.1, 0.9)],
        LoopConfig::default(),
    );

    let request = MainProcessRequest::new("Are heat pumps worth it?").with_output_path(&output);
    let err = execute_main_process(&system, request).await.unwrap_err();

    match err {
        ProcessError::Refinement(e) => assert!(e.is_all_agents_failed()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
}

#[test]
fn test_invalid_config_is_rejected_before_any_call() {
    let usage = Arc::new(UsageTracker::new());
    let llm = ScriptedLlm::new();
    let result = ResearchSystem::from_providers(
        LoopConfig::default().with_thresholds(1.5, Some(0.2), 0.75),
        Arc::new(llm.clone()),
        ModelSet::uniform("gpt-4o"),
        Arc::new(StaticSearch::new(Vec::new())),
        usage,
    );

    assert!(result.is_err());
    assert_eq!(llm.calls(), 0);
}

/// Scripted model and static search behind the production components
#[tokio::test]
async fn test_full_pipeline_with_scripted_model() {
    let dir = tempfile::tempdir().unwrap();
    let usage = Arc::new(UsageTracker::new());

    let llm = ScriptedLlm::new()
        .on("sub_questions", BRIEF_JSON)
        .on("\"queries\"", r#"{"queries": ["heat pump COP field study"]}"#)
        .on(
            "\"findings\"",
            r#"{"findings": [{"claim": "Field studies measure a seasonal COP of about 3", "source": "https://iea.example/heat-pumps"}]}"#,
        )
        .on(
            "one_sided_score",
            r#"{"one_sided_score": 0.1, "source_diversity_score": 0.9, "quantitative_ratio": 0.8}"#,
        )
        .on("source_credibility_score", r#"{"source_credibility_score": 0.9, "weak_sources": []}"#)
        .on("unsupported_claims", r#"{"unsupported_claims": [], "missing_counter_evidence": []}"#)
        .on(
            "Write the full report now",
            "# Heat pumps\n\nField studies measure a seasonal COP of about 3 ([IEA](https://iea.example/heat-pumps)).",
        )
        .on("Write the executive summary now", SUMMARY);
    let search = StaticSearch::new(vec![SearchHit::new(
        "Heat pumps in practice",
        "https://iea.example/heat-pumps",
        "Seasonal COP of about 3 in field studies",
    )]);

    let config = LoopConfig::default()
        .with_link_validation(false)
        .with_retry(0, std::time::Duration::from_millis(1), std::time::Duration::from_millis(1));
    let system = ResearchSystem::from_providers(
        config,
        Arc::new(llm.clone()),
        ModelSet::uniform("gpt-4o"),
        Arc::new(search.clone()),
        Arc::clone(&usage),
    )
    .unwrap();

    let request = MainProcessRequest::new("Are heat pumps worth it?").with_output_path(dir.path());
    let result = execute_main_process(&system, request).await.unwrap();

    assert_eq!(result.metadata.terminal, Terminal::Accepted);
    assert!(result.report.starts_with("# Heat pumps"));
    assert_eq!(result.metadata.citations, vec!["https://iea.example/heat-pumps"]);

    // two questions, each searched directly and with one planned query
    assert_eq!(search.calls(), 4);
    let summary = usage.summary();
    assert_eq!(summary.kind(CallKind::Search).calls, 4);
    assert_eq!(summary.component(Component::Scoping).calls, 1);
    // report synthesis and the executive summary
    assert_eq!(summary.component(Component::Supervisor).calls, 2);
    assert_eq!(summary.component(Component::Evaluator).calls, 3);
    assert_eq!(summary.component(Component::ResearchAgent).calls, 4 + 4);

    let markdown = std::fs::read_to_string(&result.report_path).unwrap();
    assert!(markdown.contains("## Pricing"));
    assert!(markdown.contains("| gpt-4o |"));
    assert_eq!(result.summary.as_deref(), Some(SUMMARY));
}

/// Link checks follow the configured retry count and per-call timeout
#[tokio::test]
async fn test_link_checks_use_configured_call_policy() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let flaky = format!("{}/flaky", server.uri());
    let slow = format!("{}/slow", server.uri());

    let usage = Arc::new(UsageTracker::new());
    let config = LoopConfig::default()
        .with_max_refinement_iterations(0)
        .with_call_timeout(Duration::from_millis(300))
        .with_retry(0, Duration::from_millis(1), Duration::from_millis(1));
    let llm = scripted_rubric().on("Write the executive summary now", SUMMARY);
    let system = ResearchSystem::from_providers(
        config,
        Arc::new(llm),
        ModelSet::uniform("gpt-4o"),
        Arc::new(StaticSearch::new(Vec::new())),
        Arc::clone(&usage),
    )
    .unwrap();

    let request = MainProcessRequest::new("Are heat pumps worth it?")
        .with_output_path(dir.path())
        .with_initial_report(format!("Installs doubled ({flaky}). Costs fell ({slow})."));

    let result = execute_main_process(&system, request).await.unwrap();

    assert_eq!(usage.summary().kind(CallKind::LinkCheck).calls, 2);

    let mut unreachable = result.outcome.final_evaluation.unreachable_sources.clone();
    unreachable.sort();
    let mut expected = vec![flaky.clone(), slow.clone()];
    expected.sort();
    assert_eq!(unreachable, expected);

    let cleaned = std::fs::read_to_string(result.cleaned_report_path.unwrap()).unwrap();
    assert!(cleaned.contains("Installs doubled. Costs fell."));
}
