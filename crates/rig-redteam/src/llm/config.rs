//! Request settings and token accounting

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Tokens billed for one or more completions
///
/// ```
/// use rig_redteam::llm::TokenUsage;
///
/// let mut usage = TokenUsage::new(1200, 300);
/// usage += TokenUsage::new(800, 200);
/// assert_eq!(usage.total_tokens, 2500);
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Model and sampling settings for a completion.
///
/// Each role in the pipeline (writer, summarizer, reviewer) carries its own.
///
/// ```
/// use rig_redteam::llm::LLMConfig;
///
/// let reviewer = LLMConfig::new("gpt-4o").with_temperature(0.0);
/// assert_eq!(reviewer.temperature, Some(0.0));
/// assert_eq!(reviewer.max_tokens, None);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LLMConfig {
    /// Also the key into the pricing table
    pub model: String,
    /// Provider default when unset
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl LLMConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}
