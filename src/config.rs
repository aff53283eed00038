//! # Application Configuration
//!
//! Everything the binary needs to wire real providers: which LLM backend to
//! talk to, which model plays which role, which search backend to use and
//! the API keys those choices require. Loop tuning (thresholds, budget,
//! retries) lives in [`LoopConfig`] and is read from the same environment.

use anyhow::{bail, Context, Result};
use std::str::FromStr;

use rig_redteam::LoopConfig;

// =============================================================================
// PROVIDER SELECTION
// =============================================================================
/// Completion backend selected by `LLM_PROVIDER`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProviderKind {
    /// Model used for every role unless overridden
    fn default_model(self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "gpt-4o",
            LlmProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            LlmProviderKind::Ollama => "llama3.2",
        }
    }

    /// Cheaper model for query planning and finding extraction
    fn default_summarization_model(self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "gpt-4o-mini",
            LlmProviderKind::Anthropic => "claude-3-5-haiku-latest",
            LlmProviderKind::Ollama => "llama3.2",
        }
    }
}

impl FromStr for LlmProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => bail!("LLM_PROVIDER must be one of openai, anthropic, ollama (got: {other})"),
        }
    }
}

/// Web search backend selected by `SEARCH_PROVIDER`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Tavily,
    DuckDuckGo,
}

impl FromStr for SearchBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tavily" => Ok(Self::Tavily),
            "duckduckgo" | "ddg" => Ok(Self::DuckDuckGo),
            other => bail!("SEARCH_PROVIDER must be tavily or duckduckgo (got: {other})"),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: LlmProviderKind,

    /// Scoping and report synthesis
    pub writer_model: String,

    /// Query planning and finding extraction inside research agents
    pub summarization_model: String,

    /// Red-team reviewer
    pub evaluator_model: String,

    /// Sampling temperature for the writer and summarization roles.
    /// The evaluator always runs at 0.0 so repeated reviews agree.
    pub temperature: f64,

    pub search: SearchBackend,

    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub tavily_api_key: Option<String>,

    pub loop_config: LoopConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let provider = LlmProviderKind::OpenAi;
        Self {
            provider,
            writer_model: provider.default_model().to_string(),
            summarization_model: provider.default_summarization_model().to_string(),
            evaluator_model: provider.default_model().to_string(),
            temperature: 0.3,
            search: SearchBackend::Tavily,
            openai_api_key: None,
            anthropic_api_key: None,
            tavily_api_key: None,
            loop_config: LoopConfig::default(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl AppConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    ///
    /// Model names left unset follow the selected provider's defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(val) = get("LLM_PROVIDER") {
            config.provider = val.parse()?;
        }
        let provider = config.provider;

        config.writer_model = get("WRITER_MODEL").unwrap_or_else(|| provider.default_model().to_string());
        config.summarization_model =
            get("SUMMARIZATION_MODEL").unwrap_or_else(|| provider.default_summarization_model().to_string());
        config.evaluator_model = get("EVALUATOR_MODEL").unwrap_or_else(|| provider.default_model().to_string());

        if let Some(val) = get("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.3)")?;
        }

        if let Some(val) = get("SEARCH_PROVIDER") {
            config.search = val.parse()?;
        }

        config.openai_api_key = get("OPENAI_API_KEY");
        config.anthropic_api_key = get("ANTHROPIC_API_KEY");
        config.tavily_api_key = get("TAVILY_API_KEY");

        config.loop_config = LoopConfig::from_lookup(&lookup).context("invalid research loop configuration")?;

        Ok(config)
    }

    /// Fail fast on values no provider call could succeed with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("TEMPERATURE must be between 0.0 and 2.0, got: {}", self.temperature);
        }

        for (name, value) in [
            ("WRITER_MODEL", &self.writer_model),
            ("SUMMARIZATION_MODEL", &self.summarization_model),
            ("EVALUATOR_MODEL", &self.evaluator_model),
        ] {
            if value.is_empty() {
                bail!("{name} cannot be empty");
            }
        }

        match self.provider {
            LlmProviderKind::OpenAi if self.openai_api_key.is_none() => {
                bail!("OPENAI_API_KEY is required when LLM_PROVIDER=openai")
            }
            LlmProviderKind::Anthropic if self.anthropic_api_key.is_none() => {
                bail!("ANTHROPIC_API_KEY is required when LLM_PROVIDER=anthropic")
            }
            _ => {}
        }

        if self.search == SearchBackend::Tavily && self.tavily_api_key.is_none() {
            bail!("TAVILY_API_KEY is required when SEARCH_PROVIDER=tavily (or set SEARCH_PROVIDER=duckduckgo)");
        }

        self.loop_config.validate()?;
        Ok(())
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_follow_provider() {
        let config = AppConfig::from_lookup(lookup(&[("LLM_PROVIDER", "ollama")])).unwrap();

        assert_eq!(config.provider, LlmProviderKind::Ollama);
        assert_eq!(config.writer_model, "llama3.2");
        assert_eq!(config.summarization_model, "llama3.2");
        assert_eq!(config.loop_config, LoopConfig::default());
    }

    #[test]
    fn test_model_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("WRITER_MODEL", "gpt-4.1"),
            ("EVALUATOR_MODEL", "o3-mini"),
            ("SEARCH_PROVIDER", "DuckDuckGo"),
            ("MAX_REFINEMENT_ITERATIONS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.writer_model, "gpt-4.1");
        assert_eq!(config.summarization_model, "gpt-4o-mini");
        assert_eq!(config.evaluator_model, "o3-mini");
        assert_eq!(config.search, SearchBackend::DuckDuckGo);
        assert_eq!(config.loop_config.max_refinement_iterations, 5);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("LLM_PROVIDER", "cohere")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("SEARCH_PROVIDER", "bing")])).is_err());
    }

    #[test]
    fn test_api_keys_are_required() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test"), ("TAVILY_API_KEY", "tvly-test")]))
            .unwrap();
        assert!(config.validate().is_ok());

        let config = AppConfig::from_lookup(lookup(&[("LLM_PROVIDER", "ollama"), ("SEARCH_PROVIDER", "duckduckgo")]))
            .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_temperature() {
        let mut config = AppConfig::from_lookup(lookup(&[("LLM_PROVIDER", "ollama"), ("SEARCH_PROVIDER", "ddg")]))
            .unwrap();
        config.temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_loop_config_errors_surface() {
        assert!(AppConfig::from_lookup(lookup(&[("MIN_OBJECTIVITY_SCORE", "1.5")])).is_err());
    }
}
