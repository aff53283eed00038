//! Red Team Evaluator
//!
//! Scores a draft on objectivity, bias and source quality and decides
//! accept or refine. The verdict is a pure function of the scores and the
//! configured [`Thresholds`]; every evaluator goes through
//! [`Thresholds::assess`] so the accept rule lives in one place.

pub mod links;
pub mod rubric;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EvaluationError, LlmError};
use crate::llm::ModelClient;
use crate::prompts;
use crate::state::{DraftReport, EvaluationResult, Verdict};
use crate::usage::Component;

pub use links::{LinkCheck, LinkError, LinkReport, LinkValidator};
pub use rubric::{BiasAnalysis, ClaimAnalysis, SourceAnalysis};

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, draft: &DraftReport) -> Result<EvaluationResult, EvaluationError>;
}

/// The three rubric scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub objectivity: f64,
    /// Lower is less biased
    pub bias: f64,
    pub source_quality: f64,
}

impl Scores {
    pub fn new(objectivity: f64, bias: f64, source_quality: f64) -> Self {
        Self {
            objectivity,
            bias,
            source_quality,
        }
    }
}

/// Accept thresholds. Without `max_bias` the bias score never blocks acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_objectivity: f64,
    pub max_bias: Option<f64>,
    pub min_source_quality: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_objectivity: 0.75,
            max_bias: Some(0.20),
            min_source_quality: 0.75,
        }
    }
}

impl Thresholds {
    pub fn new(min_objectivity: f64, max_bias: Option<f64>, min_source_quality: f64) -> Self {
        Self {
            min_objectivity,
            max_bias,
            min_source_quality,
        }
    }

    /// One message per dimension that misses its threshold
    pub fn failing_dimensions(&self, scores: &Scores) -> Vec<String> {
        let mut failing = Vec::new();
        if scores.objectivity < self.min_objectivity {
            failing.push(format!(
                "Objectivity {:.2} is below the required {:.2}",
                scores.objectivity, self.min_objectivity
            ));
        }
        if let Some(max_bias) = self.max_bias {
            if scores.bias > max_bias {
                failing.push(format!(
                    "Bias {:.2} is above the allowed {:.2}",
                    scores.bias, max_bias
                ));
            }
        }
        if scores.source_quality < self.min_source_quality {
            failing.push(format!(
                "Source quality {:.2} is below the required {:.2}",
                scores.source_quality, self.min_source_quality
            ));
        }
        failing
    }

    pub fn verdict(&self, scores: &Scores) -> Verdict {
        if self.failing_dimensions(scores).is_empty() {
            Verdict::Accept
        } else {
            Verdict::Refine
        }
    }

    /// Build the result: dimension failures first, then specific findings
    pub fn assess(&self, scores: Scores, findings: Vec<String>) -> EvaluationResult {
        let verdict = self.verdict(&scores);
        let mut issues = self.failing_dimensions(&scores);
        issues.extend(findings);

        EvaluationResult {
            objectivity: scores.objectivity,
            bias: scores.bias,
            source_quality: scores.source_quality,
            issues,
            verdict,
            unreachable_sources: Vec::new(),
        }
    }
}

/// Stand-in used when red-team evaluation is disabled; accepts everything
/// and makes no calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassEvaluator;

#[async_trait]
impl Evaluator for BypassEvaluator {
    async fn evaluate(&self, _draft: &DraftReport) -> Result<EvaluationResult, EvaluationError> {
        Ok(EvaluationResult::bypass())
    }
}

/// Adversarial reviewer backed by the evaluator model
pub struct RedTeamEvaluator {
    model: ModelClient,
    thresholds: Thresholds,
    links: Option<LinkValidator>,
}

impl RedTeamEvaluator {
    pub fn new(model: ModelClient, thresholds: Thresholds) -> Self {
        Self {
            model: model.for_component(Component::Evaluator),
            thresholds,
            links: None,
        }
    }

    /// Check citations for reachability before scoring source quality
    pub fn with_link_validator(mut self, validator: LinkValidator) -> Self {
        self.links = Some(validator);
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    async fn rubric_call<T>(&self, dimension: &'static str, prompt: String) -> Result<T, EvaluationError>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        self.model
            .complete_json::<T>(prompts::RED_TEAM_SYSTEM, &prompt)
            .await
            .map_err(|source: LlmError| EvaluationError::Rubric { dimension, source })
    }
}

#[async_trait]
impl Evaluator for RedTeamEvaluator {
    async fn evaluate(&self, draft: &DraftReport) -> Result<EvaluationResult, EvaluationError> {
        let citations: Vec<String> = draft.citations.iter().cloned().collect();

        let link_check = async {
            match &self.links {
                Some(validator) if !citations.is_empty() => Ok::<_, EvaluationError>(validator.validate(&citations).await),
                _ => Ok(LinkReport::default()),
            }
        };

        let (bias, source, claims, link_report) = tokio::try_join!(
            self.rubric_call::<BiasAnalysis>("bias", prompts::bias_prompt(&draft.body)),
            self.rubric_call::<SourceAnalysis>("source quality", prompts::source_prompt(&draft.body, &citations)),
            self.rubric_call::<ClaimAnalysis>("claims", prompts::claims_prompt(&draft.body)),
            link_check,
        )?;

        let scores = rubric::score(&bias, &source, &claims, link_report.valid_fraction());

        let mut findings = rubric::recommendations(&bias, &source, &claims);
        findings.extend(link_report.invalid().map(|check| {
            format!(
                "Unreachable source {}: {}",
                check.url,
                check.error.as_ref().map(ToString::to_string).unwrap_or_default()
            )
        }));

        let mut result = self.thresholds.assess(scores, findings);
        result.unreachable_sources = link_report.invalid().map(|check| check.url.clone()).collect();
        info!(
            iteration = draft.iteration,
            objectivity = result.objectivity,
            bias = result.bias,
            source_quality = result.source_quality,
            issues = result.issues.len(),
            verdict = ?result.verdict,
            "draft evaluated"
        );
        Ok(result)
    }
}
