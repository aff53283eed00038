//! LLM completion capability
//!
//! - [`LLMProvider`]: provider-agnostic completion trait
//! - Rig-backed providers: [`OpenAIProvider`], [`AnthropicProvider`], [`OllamaProvider`]
//! - [`ModelClient`]: a provider bound to a model, a billed component, a
//!   retry policy and a per-call timeout

pub mod client;
pub mod config;
pub mod json;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::ModelClient;
pub use config::{LLMConfig, TokenUsage};
pub use json::{extract_json_object, parse_json};
pub use message::{extract_system_preamble, last_user_prompt, Message, Role};
pub use provider::{LLMProvider, LLMResponse};
pub use providers::{AnthropicProvider, OllamaProvider, OpenAIProvider};
