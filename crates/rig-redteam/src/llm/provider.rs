//! The completion capability
//!
//! Messages in, one assistant message out. Implementations bridge to Rig's
//! clients ([`super::providers`]) or replay scripted replies
//! ([`crate::stub::ScriptedLlm`]).

use async_trait::async_trait;

use super::config::{LLMConfig, TokenUsage};
use super::message::Message;
use crate::error::LlmError;

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub message: Message,
    /// Reported by the provider; `None` means the caller estimates
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    pub fn new(message: Message) -> Self {
        Self { message, usage: None }
    }

    pub fn with_usage(self, usage: TokenUsage) -> Self {
        Self {
            usage: Some(usage),
            ..self
        }
    }

    pub fn text(&self) -> &str {
        &self.message.content
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// One completion. `config` replaces the provider's defaults for this
    /// call; rate limits, timeouts and provider faults come back as
    /// [`LlmError`] for the caller's retry policy to judge.
    async fn complete(&self, messages: &[Message], config: Option<&LLMConfig>) -> Result<LLMResponse, LlmError>;

    /// Short identifier used in logs and errors
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;
}
