//! Token estimates for completions whose provider reports no usage
//!
//! Good enough for cost tracking: bytes over a per-family density, plus a
//! small framing cost for every message.

use crate::llm::{Message, Role, TokenUsage};

/// Bytes per token for GPT-style tokenizers
const GPT_DENSITY: f32 = 4.0;

/// Claude tokenizes English slightly finer
const CLAUDE_DENSITY: f32 = 3.3;

/// Framing tokens charged per message
const FRAMING_TOKENS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproxTokenCounter {
    bytes_per_token: f32,
}

impl ApproxTokenCounter {
    pub fn for_model(model: &str) -> Self {
        let bytes_per_token = if model.to_ascii_lowercase().contains("claude") {
            CLAUDE_DENSITY
        } else {
            GPT_DENSITY
        };
        Self { bytes_per_token }
    }

    fn tokens(&self, bytes: usize) -> u64 {
        (bytes as f32 / self.bytes_per_token).ceil() as u64
    }

    fn message_tokens(&self, role: Role, content: &str) -> u64 {
        let role_bytes = match role {
            Role::System => "system".len(),
            Role::User => "user".len(),
            Role::Assistant => "assistant".len(),
        };
        self.tokens(content.len() + role_bytes) + FRAMING_TOKENS
    }

    /// Prompt tokens for `messages`, completion tokens for `reply`
    pub fn estimate_usage(&self, messages: &[Message], reply: &str) -> TokenUsage {
        let input = messages
            .iter()
            .map(|m| self.message_tokens(m.role, &m.content))
            .sum();
        TokenUsage::new(input, self.message_tokens(Role::Assistant, reply))
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self {
            bytes_per_token: GPT_DENSITY,
        }
    }
}
