//! Scoping Coordinator
//!
//! Turns a raw query, plus an optional clarification exchange, into a
//! [`ResearchBrief`]. A query that yields no sub-question is rejected as
//! ambiguous unless a clarification was supplied or best-effort briefs are
//! enabled, in which case the brief holds the query itself as its only
//! sub-question.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{LlmError, ScopingError};
use crate::llm::ModelClient;
use crate::prompts;
use crate::state::ResearchBrief;
use crate::supervisor::normalize_question;

/// A clarifying question and the user's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub answer: String,
}

impl Clarification {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BriefDraft {
    #[serde(default)]
    objective: String,
    #[serde(default)]
    sub_questions: Vec<String>,
    #[serde(default)]
    constraints: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ScopingCoordinator {
    model: ModelClient,
    allow_best_effort: bool,
    max_sub_questions: usize,
}

impl ScopingCoordinator {
    pub fn new(model: ModelClient) -> Self {
        Self {
            model,
            allow_best_effort: false,
            max_sub_questions: 8,
        }
    }

    /// Accept a single-question brief instead of failing on vague queries
    pub fn with_best_effort(mut self, allow: bool) -> Self {
        self.allow_best_effort = allow;
        self
    }

    pub fn with_max_sub_questions(mut self, max: usize) -> Self {
        self.max_sub_questions = max.max(1);
        self
    }

    pub async fn produce_brief(
        &self,
        query: &str,
        clarification: Option<&Clarification>,
    ) -> Result<ResearchBrief, ScopingError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ScopingError::AmbiguousQuery {
                query: query.to_string(),
            });
        }

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let prompt = prompts::scoping_prompt(
            query,
            clarification.map(|c| (c.question.as_str(), c.answer.as_str())),
            &today,
        );

        let draft = match self
            .model
            .complete_json::<BriefDraft>(prompts::SCOPING_SYSTEM, &prompt)
            .await
        {
            Ok(draft) => Some(draft),
            Err(LlmError::MalformedResponse(reason)) => {
                warn!(reason = %reason, "brief reply stayed malformed after retries");
                None
            }
            Err(e) => return Err(ScopingError::Llm(e)),
        };

        let (objective, sub_questions, constraints) = match draft {
            Some(draft) => (
                draft.objective,
                self.clean_questions(draft.sub_questions),
                stringify_constraints(draft.constraints),
            ),
            None => (String::new(), Vec::new(), BTreeMap::new()),
        };

        let objective = if objective.trim().is_empty() {
            query.to_string()
        } else {
            objective.trim().to_string()
        };

        let sub_questions = if sub_questions.is_empty() {
            if clarification.is_none() && !self.allow_best_effort {
                info!(query = %query, "query too ambiguous for a brief");
                return Err(ScopingError::AmbiguousQuery {
                    query: query.to_string(),
                });
            }
            debug!("falling back to a single-question brief");
            vec![best_effort_question(query, clarification)]
        } else {
            sub_questions
        };

        info!(
            sub_questions = sub_questions.len(),
            constraints = constraints.len(),
            "research brief ready"
        );

        Ok(ResearchBrief {
            objective,
            sub_questions,
            constraints,
        })
    }

    fn clean_questions(&self, questions: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .filter(|q| seen.insert(normalize_question(q)))
            .take(self.max_sub_questions)
            .collect()
    }
}

fn best_effort_question(query: &str, clarification: Option<&Clarification>) -> String {
    match clarification {
        Some(c) if !c.answer.trim().is_empty() => format!("{} ({})", query, c.answer.trim()),
        _ => query.to_string(),
    }
}

fn stringify_constraints(raw: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMConfig;
    use crate::retry::RetryPolicy;
    use crate::stub::ScriptedLlm;
    use crate::usage::{Component, UsageTracker};
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator(llm: ScriptedLlm, usage: &Arc<UsageTracker>) -> ScopingCoordinator {
        let model = ModelClient::new(
            Arc::new(llm),
            LLMConfig::new("gpt-4o"),
            Component::Scoping,
            Arc::clone(usage),
        )
        .with_retry_policy(RetryPolicy::new(1).with_backoff_base(Duration::from_millis(1)));
        ScopingCoordinator::new(model)
    }

    #[tokio::test]
    async fn test_brief_from_json_reply() {
        let usage = Arc::new(UsageTracker::new());
        let llm = ScriptedLlm::new().on(
            "sub_questions",
            r#"{"objective": "Compare heat pumps", "sub_questions": ["Efficiency?", " efficiency? ", "Cost?"],
               "constraints": {"region": "EU", "years": 5, "ignored": null}}"#,
        );

        let brief = coordinator(llm, &usage)
            .produce_brief("heat pumps vs gas boilers", None)
            .await
            .unwrap();

        assert_eq!(brief.objective, "Compare heat pumps");
        assert_eq!(brief.sub_questions, vec!["Efficiency?", "Cost?"]);
        assert_eq!(brief.constraints["region"], "EU");
        assert_eq!(brief.constraints["years"], "5");
        assert!(!brief.constraints.contains_key("ignored"));
        assert_eq!(usage.summary().component(Component::Scoping).calls, 1);
    }

    #[tokio::test]
    async fn test_no_sub_questions_is_ambiguous() {
        let usage = Arc::new(UsageTracker::new());
        let llm = ScriptedLlm::new().on("sub_questions", r#"{"objective": "", "sub_questions": []}"#);

        let err = coordinator(llm, &usage).produce_brief("stuff", None).await.unwrap_err();
        assert!(matches!(err, ScopingError::AmbiguousQuery { .. }));
    }

    #[tokio::test]
    async fn test_clarification_allows_single_question_brief() {
        let usage = Arc::new(UsageTracker::new());
        let llm = ScriptedLlm::new().on("sub_questions", r#"{"sub_questions": []}"#);
        let clarification = Clarification::new("What about it?", "battery recycling");

        let brief = coordinator(llm, &usage)
            .produce_brief("stuff", Some(&clarification))
            .await
            .unwrap();

        assert_eq!(brief.sub_questions, vec!["stuff (battery recycling)"]);
        assert_eq!(brief.objective, "stuff");
    }

    #[tokio::test]
    async fn test_best_effort_policy() {
        let usage = Arc::new(UsageTracker::new());
        let llm = ScriptedLlm::new().on("sub_questions", "no json at all");

        let brief = coordinator(llm, &usage)
            .with_best_effort(true)
            .produce_brief("  quantum batteries ", None)
            .await
            .unwrap();

        assert_eq!(brief.sub_questions, vec!["quantum batteries"]);
    }

    #[tokio::test]
    async fn test_empty_query_always_ambiguous() {
        let usage = Arc::new(UsageTracker::new());
        let err = coordinator(ScriptedLlm::new(), &usage)
            .with_best_effort(true)
            .produce_brief("   ", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ScopingError::AmbiguousQuery { .. }));
        assert!(usage.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_ambiguity() {
        let usage = Arc::new(UsageTracker::new());
        let llm = ScriptedLlm::new().fail_on(
            "sub_questions",
            LlmError::Unauthorized {
                provider: "scripted".into(),
            },
        );

        let err = coordinator(llm, &usage).produce_brief("topic", None).await.unwrap_err();
        assert!(matches!(err, ScopingError::Llm(LlmError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_sub_questions_are_capped() {
        let usage = Arc::new(UsageTracker::new());
        let llm = ScriptedLlm::new().on("sub_questions", r#"{"sub_questions": ["a", "b", "c", "d"]}"#);

        let brief = coordinator(llm, &usage)
            .with_max_sub_questions(2)
            .produce_brief("letters", None)
            .await
            .unwrap();
        assert_eq!(brief.sub_questions, vec!["a", "b"]);
    }
}
