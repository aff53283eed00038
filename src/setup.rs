//! Wiring the real providers into a [`ResearchSystem`]

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use rig_redteam::{
    AnthropicProvider, DuckDuckGoSearch, LLMConfig, LLMProvider, LoopConfig, ModelSet, OllamaProvider,
    OpenAIProvider, ResearchSystem, SearchProvider, TavilySearch, UsageTracker,
};

use crate::config::{AppConfig, LlmProviderKind, SearchBackend};

/// Completion provider for the configured backend
fn llm_provider(config: &AppConfig) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match config.provider {
        LlmProviderKind::OpenAi => {
            let key = config
                .openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is not set")?;
            Arc::new(OpenAIProvider::new(key, &config.writer_model))
        }
        LlmProviderKind::Anthropic => {
            let key = config
                .anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is not set")?;
            Arc::new(AnthropicProvider::new(key, &config.writer_model))
        }
        LlmProviderKind::Ollama => Arc::new(OllamaProvider::from_env_with_model(&config.writer_model)),
    };
    Ok(provider)
}

fn search_provider(config: &AppConfig) -> Result<Arc<dyn SearchProvider>> {
    let search: Arc<dyn SearchProvider> = match config.search {
        SearchBackend::Tavily => {
            let key = config
                .tavily_api_key
                .as_deref()
                .context("TAVILY_API_KEY is not set")?;
            Arc::new(TavilySearch::new(key))
        }
        SearchBackend::DuckDuckGo => Arc::new(DuckDuckGoSearch::new()),
    };
    Ok(search)
}

/// Per-role models. The evaluator is pinned to temperature 0.
pub fn model_set(config: &AppConfig) -> ModelSet {
    ModelSet {
        writer: LLMConfig::new(&config.writer_model).with_temperature(config.temperature),
        summarization: LLMConfig::new(&config.summarization_model).with_temperature(config.temperature),
        evaluator: LLMConfig::new(&config.evaluator_model).with_temperature(0.0),
    }
}

/// Assemble the pipeline with `loop_config` (the CLI may have overridden
/// parts of the environment's loop settings)
pub fn build_system(config: &AppConfig, loop_config: LoopConfig) -> Result<ResearchSystem> {
    let llm = llm_provider(config)?;
    let search = search_provider(config)?;
    let usage = Arc::new(UsageTracker::new());

    info!(
        provider = ?config.provider,
        writer = %config.writer_model,
        summarization = %config.summarization_model,
        evaluator = %config.evaluator_model,
        search = search.name(),
        "providers ready"
    );

    ResearchSystem::from_providers(loop_config, llm, model_set(config), search, usage)
        .context("failed to assemble the research pipeline")
}
