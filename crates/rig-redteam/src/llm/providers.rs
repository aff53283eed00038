//! Rig-backed completion providers
//!
//! One provider type per Rig client. They differ only in how the client is
//! built and in request defaults; the completion path is generated once by
//! `rig_provider!`. Rig's `Prompt` path does not surface token usage, so
//! responses carry none and [`ModelClient`](super::ModelClient) estimates it.

use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::{anthropic, ollama, openai};

use super::config::LLMConfig;
use super::message::{extract_system_preamble, last_user_prompt, Message};
use super::provider::{LLMProvider, LLMResponse};
use crate::error::LlmError;

/// Anthropic rejects requests without max_tokens
const ANTHROPIC_MAX_TOKENS: u64 = 4096;

macro_rules! rig_provider {
    ($(#[$doc:meta])* $name:ident, $client:ty, $label:literal) => {
        $(#[$doc])*
        pub struct $name {
            client: $client,
            /// Used when a call passes no config; its `max_tokens` also
            /// fills in for calls that leave it unset
            defaults: LLMConfig,
        }

        #[async_trait]
        impl LLMProvider for $name {
            async fn complete(
                &self,
                messages: &[Message],
                config: Option<&LLMConfig>,
            ) -> Result<LLMResponse, LlmError> {
                let config = config.unwrap_or(&self.defaults);
                let mut builder = self.client.agent(&config.model);

                if let Some(preamble) = extract_system_preamble(messages) {
                    builder = builder.preamble(&preamble);
                }
                if let Some(temperature) = config.temperature {
                    builder = builder.temperature(temperature);
                }
                if let Some(max_tokens) = config.max_tokens.or(self.defaults.max_tokens) {
                    builder = builder.max_tokens(max_tokens);
                }

                let prompt = last_user_prompt(messages);
                let reply = builder
                    .build()
                    .prompt(&prompt)
                    .await
                    .map_err(|e| LlmError::from_provider($label, e.to_string()))?;

                Ok(LLMResponse::new(Message::assistant(reply)))
            }

            fn name(&self) -> &str {
                $label
            }

            fn default_model(&self) -> &str {
                &self.defaults.model
            }
        }
    };
}

rig_provider!(
    /// OpenAI chat models
    ///
    /// ```rust,ignore
    /// let provider = OpenAIProvider::from_env_with_model("gpt-4o")?;
    /// ```
    OpenAIProvider,
    openai::Client,
    "openai"
);

rig_provider!(
    /// Anthropic (Claude) models
    AnthropicProvider,
    anthropic::Client,
    "anthropic"
);

rig_provider!(
    /// Local models served by Ollama
    OllamaProvider,
    ollama::Client,
    "ollama"
);

fn require_key(var: &str, provider: &str) -> Result<(), LlmError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        _ => Err(LlmError::Unauthorized {
            provider: provider.to_string(),
        }),
    }
}

impl OpenAIProvider {
    /// Client from OPENAI_API_KEY
    pub fn from_env_with_model(model: impl Into<String>) -> Result<Self, LlmError> {
        require_key("OPENAI_API_KEY", "openai")?;
        Ok(Self {
            client: openai::Client::from_env(),
            defaults: LLMConfig::new(model),
        })
    }

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let api_key: String = api_key.into();
        Self {
            client: openai::Client::from_val(api_key.into()),
            defaults: LLMConfig::new(model),
        }
    }
}

impl AnthropicProvider {
    /// Client from ANTHROPIC_API_KEY
    pub fn from_env_with_model(model: impl Into<String>) -> Result<Self, LlmError> {
        require_key("ANTHROPIC_API_KEY", "anthropic")?;
        Ok(Self {
            client: anthropic::Client::from_env(),
            defaults: LLMConfig::new(model).with_max_tokens(ANTHROPIC_MAX_TOKENS),
        })
    }

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let api_key: String = api_key.into();
        Self {
            client: anthropic::Client::from_val(api_key.into()),
            defaults: LLMConfig::new(model).with_max_tokens(ANTHROPIC_MAX_TOKENS),
        }
    }
}

impl OllamaProvider {
    /// Client from OLLAMA_API_BASE_URL, falling back to http://localhost:11434
    pub fn from_env_with_model(model: impl Into<String>) -> Self {
        Self {
            client: ollama::Client::from_env(),
            defaults: LLMConfig::new(model),
        }
    }
}
