//! Loop configuration
//!
//! Thresholds, budget, pool size and call policy for one research run.
//! Values come from builder methods or environment variables and are
//! validated before any brief is produced.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::evaluator::Thresholds;
use crate::retry::RetryPolicy;

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub min_objectivity_score: f64,

    /// `None` lets objectivity and source quality alone gate acceptance
    pub max_bias_score: Option<f64>,

    pub min_source_quality_score: f64,

    /// Refinement passes allowed after the first draft
    pub max_refinement_iterations: u32,

    pub enable_red_team_eval: bool,

    /// Concurrent research agents per pass; `None` runs every task at once
    pub agent_pool_size: Option<usize>,

    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    pub max_retries: usize,

    #[serde(with = "humantime_serde")]
    pub retry_backoff_base: Duration,

    #[serde(with = "humantime_serde")]
    pub retry_backoff_max: Duration,

    pub max_searches_per_agent: usize,

    pub search_results_per_query: usize,

    /// Accept a single-question brief for vague queries instead of failing
    pub allow_best_effort_brief: bool,

    /// Check cited URLs for reachability during evaluation
    pub validate_links: bool,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            min_objectivity_score: 0.75,
            max_bias_score: Some(0.20),
            min_source_quality_score: 0.75,
            max_refinement_iterations: 3,
            enable_red_team_eval: true,
            agent_pool_size: None,
            call_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(10),
            max_searches_per_agent: 3,
            search_results_per_query: 5,
            allow_best_effort_brief: false,
            validate_links: true,
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl LoopConfig {
    /// Defaults overridden by process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(val) = get("MIN_OBJECTIVITY_SCORE") {
            config.min_objectivity_score = parse("MIN_OBJECTIVITY_SCORE", &val)?;
        }

        if let Some(val) = get("MAX_BIAS_SCORE") {
            config.max_bias_score = match val.to_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(parse("MAX_BIAS_SCORE", &val)?),
            };
        }

        if let Some(val) = get("MIN_SOURCE_QUALITY_SCORE") {
            config.min_source_quality_score = parse("MIN_SOURCE_QUALITY_SCORE", &val)?;
        }

        if let Some(val) = get("MAX_REFINEMENT_ITERATIONS") {
            config.max_refinement_iterations = parse("MAX_REFINEMENT_ITERATIONS", &val)?;
        }

        if let Some(val) = get("ENABLE_RED_TEAM_EVAL") {
            config.enable_red_team_eval = parse_bool("ENABLE_RED_TEAM_EVAL", &val)?;
        }

        if let Some(val) = get("AGENT_POOL_SIZE") {
            config.agent_pool_size = Some(parse("AGENT_POOL_SIZE", &val)?);
        }

        if let Some(val) = get("CALL_TIMEOUT") {
            config.call_timeout = parse_duration("CALL_TIMEOUT", &val)?;
        }

        if let Some(val) = get("MAX_RETRIES") {
            config.max_retries = parse("MAX_RETRIES", &val)?;
        }

        if let Some(val) = get("RETRY_BACKOFF_BASE") {
            config.retry_backoff_base = parse_duration("RETRY_BACKOFF_BASE", &val)?;
        }

        if let Some(val) = get("RETRY_BACKOFF_MAX") {
            config.retry_backoff_max = parse_duration("RETRY_BACKOFF_MAX", &val)?;
        }

        if let Some(val) = get("MAX_SEARCHES_PER_AGENT") {
            config.max_searches_per_agent = parse("MAX_SEARCHES_PER_AGENT", &val)?;
        }

        if let Some(val) = get("SEARCH_RESULTS_PER_QUERY") {
            config.search_results_per_query = parse("SEARCH_RESULTS_PER_QUERY", &val)?;
        }

        if let Some(val) = get("ALLOW_BEST_EFFORT_BRIEF") {
            config.allow_best_effort_brief = parse_bool("ALLOW_BEST_EFFORT_BRIEF", &val)?;
        }

        if let Some(val) = get("VALIDATE_LINKS") {
            config.validate_links = parse_bool("VALIDATE_LINKS", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check ranges. Called by the entry point before any external call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("MIN_OBJECTIVITY_SCORE", self.min_objectivity_score)?;
        if let Some(max_bias) = self.max_bias_score {
            check_unit("MAX_BIAS_SCORE", max_bias)?;
        }
        check_unit("MIN_SOURCE_QUALITY_SCORE", self.min_source_quality_score)?;

        if self.agent_pool_size == Some(0) {
            return Err(invalid("AGENT_POOL_SIZE", "0", "must be at least 1"));
        }
        if self.call_timeout.is_zero() {
            return Err(invalid("CALL_TIMEOUT", "0s", "must be positive"));
        }
        if self.retry_backoff_max < self.retry_backoff_base {
            return Err(invalid(
                "RETRY_BACKOFF_MAX",
                &humantime::format_duration(self.retry_backoff_max).to_string(),
                "must not be shorter than RETRY_BACKOFF_BASE",
            ));
        }
        if self.max_searches_per_agent == 0 {
            return Err(invalid("MAX_SEARCHES_PER_AGENT", "0", "must be at least 1"));
        }
        if self.search_results_per_query == 0 {
            return Err(invalid("SEARCH_RESULTS_PER_QUERY", "0", "must be at least 1"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(
            self.min_objectivity_score,
            self.max_bias_score,
            self.min_source_quality_score,
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_backoff_base(self.retry_backoff_base)
            .with_backoff_max(self.retry_backoff_max)
    }

    // -------------------------------------------------------------------------
    // Builder methods
    // -------------------------------------------------------------------------

    pub fn with_thresholds(mut self, min_objectivity: f64, max_bias: Option<f64>, min_source_quality: f64) -> Self {
        self.min_objectivity_score = min_objectivity;
        self.max_bias_score = max_bias;
        self.min_source_quality_score = min_source_quality;
        self
    }

    pub fn with_max_refinement_iterations(mut self, max: u32) -> Self {
        self.max_refinement_iterations = max;
        self
    }

    pub fn with_red_team_eval(mut self, enabled: bool) -> Self {
        self.enable_red_team_eval = enabled;
        self
    }

    pub fn with_agent_pool_size(mut self, size: Option<usize>) -> Self {
        self.agent_pool_size = size;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, max_retries: usize, backoff_base: Duration, backoff_max: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_base = backoff_base;
        self.retry_backoff_max = backoff_max;
        self
    }

    pub fn with_best_effort_brief(mut self, allow: bool) -> Self {
        self.allow_best_effort_brief = allow;
        self
    }

    pub fn with_link_validation(mut self, enabled: bool) -> Self {
        self.validate_links = enabled;
        self
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(name, value, &e.to_string()))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

fn parse_duration(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| invalid(name, value, &e.to_string()))
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}
