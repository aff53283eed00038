//! Report rendering and run metadata
//!
//! The markdown file carries a header, usage statistics, the prices used, a
//! red-team section per iteration and then the report itself. The JSON file
//! carries the same facts in [`RunMetadata`].

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

use crate::config::LoopConfig;
use crate::controller::{EvaluatedDraft, RefinementOutcome, Terminal};
use crate::pricing::ModelPrice;
use crate::state::Verdict;
use crate::usage::{UsageSummary, UsageTotals};

/// Scores and critique of one evaluated draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub objectivity: f64,
    pub bias: f64,
    pub source_quality: f64,
    pub verdict: Verdict,
    pub issues: Vec<String>,
    pub failed_task_ids: Vec<String>,
    pub partial_task_ids: Vec<String>,
}

impl From<&EvaluatedDraft> for IterationRecord {
    fn from(entry: &EvaluatedDraft) -> Self {
        Self {
            iteration: entry.draft.iteration,
            objectivity: entry.evaluation.objectivity,
            bias: entry.evaluation.bias,
            source_quality: entry.evaluation.source_quality,
            verdict: entry.evaluation.verdict,
            issues: entry.evaluation.issues.clone(),
            failed_task_ids: entry.draft.provenance.failed_task_ids.clone(),
            partial_task_ids: entry.draft.provenance.partial_task_ids.clone(),
        }
    }
}

/// Identity of a run, fixed before the loop starts
#[derive(Debug, Clone, PartialEq)]
pub struct RunLabels {
    pub run_id: String,
    pub title: String,
    pub task_name: Option<String>,
    pub query: String,
    pub enrichment: bool,
}

/// Persisted description of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub title: String,
    pub task_name: Option<String>,
    pub query: String,
    /// The run started from a caller-supplied report
    pub enrichment: bool,
    pub terminal: Terminal,
    /// Budget ran out without an accepted draft
    pub exhausted: bool,
    pub iterations: u32,
    pub final_iteration: u32,
    pub final_scores: IterationRecord,
    pub per_iteration: Vec<IterationRecord>,
    /// Failed task ids across every pass, in pass order
    pub failed_task_ids: Vec<String>,
    pub citations: Vec<String>,
    pub usage: UsageSummary,
    pub config: LoopConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn from_outcome(
        labels: RunLabels,
        outcome: &RefinementOutcome,
        usage: UsageSummary,
        config: LoopConfig,
    ) -> Self {
        let per_iteration: Vec<IterationRecord> = outcome.history.iter().map(IterationRecord::from).collect();
        let failed_task_ids = outcome
            .history
            .iter()
            .flat_map(|entry| entry.draft.provenance.failed_task_ids.iter().cloned())
            .collect();
        let started_at = usage.started_at;

        Self {
            run_id: labels.run_id,
            title: labels.title,
            task_name: labels.task_name,
            query: labels.query,
            enrichment: labels.enrichment,
            terminal: outcome.terminal,
            exhausted: outcome.is_exhausted(),
            iterations: outcome.iterations,
            final_iteration: outcome.final_draft.iteration,
            final_scores: IterationRecord::from(&EvaluatedDraft {
                draft: outcome.final_draft.clone(),
                evaluation: outcome.final_evaluation.clone(),
            }),
            per_iteration,
            failed_task_ids,
            citations: outcome.final_draft.citations.iter().cloned().collect(),
            usage,
            config,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn totals_row(out: &mut String, name: &str, totals: &UsageTotals) {
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | ${:.4} |",
        name, totals.calls, totals.tokens.input_tokens, totals.tokens.output_tokens, totals.cost_usd
    );
}

/// Full markdown document for a finished run
pub fn render_markdown(metadata: &RunMetadata, body: &str, prices: &[(String, ModelPrice)]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# {}\n", metadata.title);
    if let Some(task) = &metadata.task_name {
        let _ = writeln!(out, "**Task:** {}  ", task);
    }
    let _ = writeln!(out, "**Query:** {}  ", metadata.query);
    let _ = writeln!(out, "**Generated:** {}  ", metadata.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "**Run:** {}\n", metadata.run_id);

    out.push_str("## Usage Statistics\n\n");
    out.push_str("| Component | Calls | Input tokens | Output tokens | Cost |\n");
    out.push_str("|---|---|---|---|---|\n");
    for (component, totals) in &metadata.usage.by_component {
        totals_row(&mut out, &format!("{:?}", component), totals);
    }
    totals_row(&mut out, "**Total**", &metadata.usage.total);
    let _ = writeln!(out, "\nSearch calls: {}\n", metadata.usage.search_calls());

    if !prices.is_empty() {
        out.push_str("## Pricing\n\n");
        out.push_str("| Model | Input per 1K tokens | Output per 1K tokens |\n");
        out.push_str("|---|---|---|\n");
        for (model, price) in prices {
            let _ = writeln!(out, "| {} | ${} | ${} |", model, price.input_per_1k, price.output_per_1k);
        }
        out.push('\n');
    }

    out.push_str("## Red Team Evaluation\n\n");
    let verdict = match metadata.terminal {
        Terminal::Accepted => "ACCEPTED".to_string(),
        Terminal::Exhausted => format!(
            "EXHAUSTED (no draft accepted within {} refinement passes; showing the best draft, iteration {})",
            metadata.config.max_refinement_iterations, metadata.final_iteration
        ),
    };
    let _ = writeln!(out, "**Final verdict:** {}\n", verdict);

    out.push_str("| Iteration | Objectivity | Bias | Source quality | Verdict |\n");
    out.push_str("|---|---|---|---|---|\n");
    for record in &metadata.per_iteration {
        let _ = writeln!(
            out,
            "| {} | {:.2} | {:.2} | {:.2} | {:?} |",
            record.iteration, record.objectivity, record.bias, record.source_quality, record.verdict
        );
    }
    out.push('\n');

    for record in metadata.per_iteration.iter().filter(|r| !r.issues.is_empty()) {
        let _ = writeln!(out, "### Iteration {} issues\n", record.iteration);
        for issue in &record.issues {
            let _ = writeln!(out, "- {}", issue);
        }
        out.push('\n');
    }

    if !metadata.failed_task_ids.is_empty() {
        let _ = writeln!(
            out,
            "Research tasks that failed: {}\n",
            metadata.failed_task_ids.join(", ")
        );
    }

    out.push_str("---\n\n");
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

// =============================================================================
// DERIVED ARTIFACTS
// =============================================================================

/// Longest executive summary kept, in lines
pub const SUMMARY_MAX_LINES: usize = 250;

/// `body` without citations that failed the reachability check.
///
/// Lines under a "Sources"/"References" heading that cite an unreachable URL
/// are dropped. Elsewhere a markdown link to one keeps only its label and a
/// bare mention is removed.
pub fn strip_unreachable_sources(body: &str, unreachable: &[String]) -> String {
    if unreachable.is_empty() {
        return body.to_string();
    }

    let mut in_sources = false;
    let mut kept = Vec::new();
    for line in body.lines() {
        if line.trim_start().starts_with('#') {
            in_sources = is_sources_heading(line);
            kept.push(line.to_string());
            continue;
        }

        let cites_unreachable = unreachable.iter().any(|url| line.contains(url.as_str()));
        if !cites_unreachable {
            kept.push(line.to_string());
        } else if in_sources {
            debug!(line = %line, "dropped unreachable source");
        } else {
            kept.push(unlink(line, unreachable));
        }
    }

    let mut cleaned = kept.join("\n");
    if body.ends_with('\n') {
        cleaned.push('\n');
    }
    cleaned
}

fn is_sources_heading(line: &str) -> bool {
    let title = line
        .trim_start()
        .trim_start_matches('#')
        .trim()
        .trim_end_matches(':')
        .to_ascii_lowercase();
    matches!(title.as_str(), "source" | "sources" | "references")
}

fn unlink(line: &str, unreachable: &[String]) -> String {
    unreachable.iter().fold(line.to_string(), |line, url| {
        let url = regex::escape(url);
        let pattern = format!(r"\[([^\]]*)\]\({url}\)|\s*\(\s*{url}\s*\)|{url}");
        match Regex::new(&pattern) {
            Ok(re) => re.replace_all(&line, "$1").into_owned(),
            Err(_) => line,
        }
    })
}

/// Cut `summary` to [`SUMMARY_MAX_LINES`], preferring to stop at a blank
/// line near the limit, and say so at the end.
pub fn cap_summary(summary: &str) -> String {
    let lines: Vec<&str> = summary.trim_end().lines().collect();
    if lines.len() <= SUMMARY_MAX_LINES {
        return summary.trim_end().to_string();
    }

    let head = &lines[..SUMMARY_MAX_LINES];
    let cut = head
        .iter()
        .rposition(|line| line.trim().is_empty())
        .filter(|&i| i + 10 >= SUMMARY_MAX_LINES)
        .unwrap_or(SUMMARY_MAX_LINES);

    format!(
        "{}\n\n_[Summary truncated to {SUMMARY_MAX_LINES} lines]_",
        head[..cut].join("\n").trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DraftReport, EvaluationResult, Provenance};
    use crate::usage::UsageTracker;

    fn outcome(terminal: Terminal) -> RefinementOutcome {
        let draft = |iteration: u32| DraftReport {
            body: format!("Body {iteration}"),
            citations: ["https://a.example".to_string()].into_iter().collect(),
            iteration,
            findings: Vec::new(),
            provenance: Provenance {
                task_count: 3,
                failed_task_ids: if iteration == 0 { vec!["task-2".into()] } else { vec![] },
                partial_task_ids: vec![],
            },
        };
        let evaluation = |objectivity: f64, verdict: Verdict| EvaluationResult {
            objectivity,
            bias: 0.3,
            source_quality: 0.8,
            issues: vec![format!("Objectivity {objectivity:.2} is below the required 0.75")],
            verdict,
            unreachable_sources: Vec::new(),
        };

        let history = vec![
            EvaluatedDraft { draft: draft(0), evaluation: evaluation(0.6, Verdict::Refine) },
            EvaluatedDraft { draft: draft(1), evaluation: evaluation(0.7, Verdict::Refine) },
        ];
        RefinementOutcome {
            final_draft: history[1].draft.clone(),
            final_evaluation: history[1].evaluation.clone(),
            terminal,
            iterations: 1,
            history,
        }
    }

    fn metadata(terminal: Terminal) -> RunMetadata {
        let labels = RunLabels {
            run_id: "run-1".into(),
            title: "Heat pumps".into(),
            task_name: Some("demo".into()),
            query: "are heat pumps worth it".into(),
            enrichment: false,
        };
        RunMetadata::from_outcome(
            labels,
            &outcome(terminal),
            UsageTracker::new().summary(),
            LoopConfig::default().with_max_refinement_iterations(1),
        )
    }

    #[test]
    fn test_metadata_collects_iterations() {
        let metadata = metadata(Terminal::Exhausted);

        assert!(metadata.exhausted);
        assert_eq!(metadata.iterations, 1);
        assert_eq!(metadata.per_iteration.len(), 2);
        assert_eq!(metadata.failed_task_ids, vec!["task-2"]);
        assert_eq!(metadata.final_scores.iteration, 1);
        assert_eq!(metadata.citations, vec!["https://a.example"]);
    }

    #[test]
    fn test_markdown_flags_exhausted_runs() {
        let md = render_markdown(&metadata(Terminal::Exhausted), "Body 1", &[("gpt-4o".into(), ModelPrice::new(2.5, 10.0))]);

        assert!(md.starts_with("# Heat pumps"));
        assert!(md.contains("**Task:** demo"));
        assert!(md.contains("## Usage Statistics"));
        assert!(md.contains("| gpt-4o | $2.5 | $10 |"));
        assert!(md.contains("**Final verdict:** EXHAUSTED"));
        assert!(md.contains("### Iteration 0 issues"));
        assert!(md.contains("Research tasks that failed: task-2"));
        assert!(md.trim_end().ends_with("Body 1"));
    }

    #[test]
    fn test_markdown_accepted_run() {
        let md = render_markdown(&metadata(Terminal::Accepted), "Body", &[]);
        assert!(md.contains("**Final verdict:** ACCEPTED"));
        assert!(!md.contains("## Pricing"));
    }

    #[test]
    fn test_metadata_round_trips_through_json() {
        let metadata = metadata(Terminal::Accepted);
        let json = serde_json::to_string(&metadata).unwrap();
        let back: RunMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_unreachable_sources_are_stripped() {
        let body = "# Heat pumps\n\
                    Running costs fell ([IEA](https://iea.example/costs)).\n\
                    Installs doubled (https://dead.example/installs).\n\
                    \n\
                    ## Sources\n\
                    - https://iea.example/costs\n\
                    - [Dead](https://dead.example/installs)\n\
                    \n\
                    ## Outlook\n\
                    See https://dead.example/installs for history.\n";
        let cleaned = strip_unreachable_sources(body, &["https://dead.example/installs".to_string()]);

        assert!(!cleaned.contains("dead.example"));
        assert!(cleaned.contains("Installs doubled."));
        assert!(cleaned.contains("- https://iea.example/costs"));
        assert!(!cleaned.contains("[Dead]"));
        assert!(cleaned.contains("## Outlook\nSee  for history."));
        assert!(cleaned.ends_with('\n'));
    }

    #[test]
    fn test_inline_link_keeps_its_label() {
        let cleaned = strip_unreachable_sources(
            "Costs fell per [the survey](https://dead.example/s).",
            &["https://dead.example/s".to_string()],
        );
        assert_eq!(cleaned, "Costs fell per the survey.");
    }

    #[test]
    fn test_nothing_unreachable_leaves_body_alone() {
        let body = "# Report\nSee https://iea.example.\n";
        assert_eq!(strip_unreachable_sources(body, &[]), body);
    }

    #[test]
    fn test_summary_is_capped() {
        let short = "Line one\nLine two\n";
        assert_eq!(cap_summary(short), "Line one\nLine two");

        let long: String = (0..400).map(|i| format!("line {i}\n")).collect();
        let capped = cap_summary(&long);
        assert!(capped.contains("line 249"));
        assert!(!capped.contains("line 250"));
        assert!(capped.ends_with("_[Summary truncated to 250 lines]_"));
    }

    #[test]
    fn test_summary_cut_prefers_paragraph_break() {
        let long: String = (0..300)
            .map(|i| if i == 245 { "\n".to_string() } else { format!("line {i}\n") })
            .collect();
        let capped = cap_summary(&long);
        assert!(capped.contains("line 244"));
        assert!(!capped.contains("line 246"));
    }
}
