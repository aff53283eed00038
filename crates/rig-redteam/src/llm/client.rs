//! Model handle shared by the pipeline components
//!
//! A [`ModelClient`] binds a provider to one model configuration and to the
//! component it bills. Every call runs under the per-call timeout and retry
//! policy and lands in the usage ledger once per attempt. An attempt cut off
//! by the timeout is billed for its estimated prompt tokens.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::config::{LLMConfig, TokenUsage};
use super::json::parse_json;
use super::message::Message;
use super::provider::LLMProvider;
use crate::error::LlmError;
use crate::retry::{call_with_retry_observed, RetryPolicy};
use crate::tokens::ApproxTokenCounter;
use crate::usage::{CallKind, Component, UsageTracker};

#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn LLMProvider>,
    config: LLMConfig,
    component: Component,
    usage: Arc<UsageTracker>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider.name())
            .field("model", &self.config.model)
            .field("component", &self.component)
            .finish()
    }
}

impl ModelClient {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        config: LLMConfig,
        component: Component,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            provider,
            config,
            component,
            usage,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Same provider and model, billed to another component
    pub fn for_component(&self, component: Component) -> Self {
        Self {
            component,
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn component(&self) -> Component {
        self.component
    }

    /// Free-text completion
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let messages = [Message::system(system), Message::user(prompt)];
        let messages = &messages;
        let label = format!("{:?}/{}", self.component, self.config.model);

        call_with_retry_observed(
            &self.retry,
            self.call_timeout,
            &label,
            move || async move { self.complete_once(messages).await },
            || self.record_timed_out(messages),
        )
        .await
    }

    /// Completion parsed as JSON; a malformed reply is retried like any
    /// other transient failure.
    pub async fn complete_json<T: DeserializeOwned + Send>(&self, system: &str, prompt: &str) -> Result<T, LlmError> {
        let messages = [Message::system(system), Message::user(prompt)];
        let messages = &messages;
        let label = format!("{:?}/{}", self.component, self.config.model);

        call_with_retry_observed(
            &self.retry,
            self.call_timeout,
            &label,
            move || async move {
                let text = self.complete_once(messages).await?;
                parse_json::<T>(&text)
            },
            || self.record_timed_out(messages),
        )
        .await
    }

    async fn complete_once(&self, messages: &[Message]) -> Result<String, LlmError> {
        let response = self.provider.complete(messages, Some(&self.config)).await?;
        let usage = response.usage.unwrap_or_else(|| {
            ApproxTokenCounter::for_model(&self.config.model).estimate_usage(messages, response.text())
        });

        self.usage
            .record(self.component, CallKind::Completion, &self.config.model, usage);
        Ok(response.message.content)
    }

    fn record_timed_out(&self, messages: &[Message]) {
        let sent = ApproxTokenCounter::for_model(&self.config.model).estimate_usage(messages, "");
        self.usage.record(
            self.component,
            CallKind::Completion,
            &self.config.model,
            TokenUsage::new(sent.input_tokens, 0),
        );
    }
}
