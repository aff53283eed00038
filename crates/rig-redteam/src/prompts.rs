//! Prompt templates
//!
//! Working defaults only. Structured prompts name the JSON keys the parsers
//! in each component expect.

pub const SCOPING_SYSTEM: &str = "You are a research lead. Turn the user's request into a research brief. \
Reply with a single JSON object and nothing else.";

pub fn scoping_prompt(query: &str, clarification: Option<(&str, &str)>, today: &str) -> String {
    let mut prompt = format!(
        "Today's date is {today}.\n\nUser request:\n{query}\n"
    );
    if let Some((question, answer)) = clarification {
        prompt.push_str(&format!(
            "\nClarifying question asked: {question}\nUser's answer: {answer}\n"
        ));
    }
    prompt.push_str(
        "\nReturn JSON with keys:\n\
         - \"objective\": one sentence describing what the final report must answer\n\
         - \"sub_questions\": a list of focused, independently researchable questions \
         (empty if the request is too vague to research)\n\
         - \"constraints\": an object of explicit requirements (timeframe, region, sources, format)\n",
    );
    prompt
}

pub const QUERY_PLAN_SYSTEM: &str =
    "You plan web searches for a research assistant. Reply with a single JSON object.";

pub fn query_plan_prompt(question: &str, context: &str, max_queries: usize) -> String {
    format!(
        "{context}\n\nQuestion to research:\n{question}\n\n\
         Propose up to {max_queries} additional search engine queries that would find \
         evidence for and against likely answers. Return JSON: {{\"queries\": [\"...\"]}}"
    )
}

pub const COMPRESS_SYSTEM: &str = "You extract verifiable findings from web search results. \
Only report claims that the results support, each with the URL it came from. \
Reply with a single JSON object.";

pub fn compress_prompt(question: &str, results: &str) -> String {
    format!(
        "Question:\n{question}\n\nSearch results:\n{results}\n\n\
         Return JSON: {{\"findings\": [{{\"claim\": \"...\", \"source\": \"<url>\"}}]}}"
    )
}

pub const SYNTHESIS_SYSTEM: &str = "You are a research writer. Write a balanced, well-structured \
markdown report from the findings provided. Cite sources inline as markdown links. \
Present counter-evidence where it exists and do not state claims the findings do not support.";

pub fn synthesis_prompt(
    objective: &str,
    findings: &str,
    previous_draft: Option<&str>,
    critique: &[String],
) -> String {
    let mut prompt = format!("Research objective:\n{objective}\n\nFindings:\n{findings}\n");
    if let Some(previous) = previous_draft {
        prompt.push_str(&format!(
            "\nPrevious draft to improve (keep what is well supported):\n{previous}\n"
        ));
    }
    if !critique.is_empty() {
        prompt.push_str("\nReviewer critique to address:\n");
        for issue in critique {
            prompt.push_str(&format!("- {issue}\n"));
        }
    }
    prompt.push_str("\nWrite the full report now.");
    prompt
}

pub const RED_TEAM_SYSTEM: &str = "You are an adversarial reviewer of research reports. \
Your job is to find bias, weak sourcing and unsupported claims. Be strict and specific. \
Reply with a single JSON object.";

pub fn bias_prompt(report: &str) -> String {
    format!(
        "Analyze the report below for bias.\n\nReport:\n{report}\n\n\
         Return JSON with keys:\n\
         - \"one_sided_score\": 0.0 (balanced) to 1.0 (entirely one-sided)\n\
         - \"source_diversity_score\": 0.0 (single viewpoint) to 1.0 (diverse sources)\n\
         - \"quantitative_ratio\": share of claims backed by numbers, 0.0 to 1.0\n\
         - \"missing_counter_evidence\": list of perspectives or evidence that is absent\n\
         - \"confirmation_bias_indicators\": list of specific passages that cherry-pick"
    )
}

pub fn source_prompt(report: &str, citations: &[String]) -> String {
    let list = if citations.is_empty() {
        "(none)".to_string()
    } else {
        citations.join("\n")
    };
    format!(
        "Assess the credibility of the sources this report relies on.\n\nCited sources:\n{list}\n\n\
         Report:\n{report}\n\n\
         Return JSON with keys:\n\
         - \"source_credibility_score\": 0.0 (unreliable) to 1.0 (authoritative, primary sources)\n\
         - \"weak_sources\": list of sources that are unreliable, outdated or promotional"
    )
}

pub fn claims_prompt(report: &str) -> String {
    format!(
        "Check every factual claim in the report against the sources it cites.\n\nReport:\n{report}\n\n\
         Return JSON with keys:\n\
         - \"unsupported_claims\": list of claims with no adequate citation\n\
         - \"missing_counter_evidence\": list of claims stated without known counter-evidence"
    )
}

pub const SUMMARY_SYSTEM: &str = "You write executive summaries of research reports for decision makers. \
Carry over the report's citations for every claim you keep and add no claims of your own.";

/// Longest report excerpt sent for summarization, in characters
const SUMMARY_REPORT_CHARS: usize = 50_000;

pub fn summary_prompt(query: &str, report: &str, review: &[String]) -> String {
    let report: String = report.chars().take(SUMMARY_REPORT_CHARS).collect();
    let review = if review.is_empty() {
        "No open reviewer concerns.".to_string()
    } else {
        review.iter().map(|issue| format!("- {issue}")).collect::<Vec<_>>().join("\n")
    };
    format!(
        "Question:\n{query}\n\nReport:\n{report}\n\nOpen reviewer concerns:\n{review}\n\n\
         Lead with the answer to the question, then the key findings and their caveats. \
         Mention the reviewer concerns that still apply. Write the executive summary now."
    )
}
