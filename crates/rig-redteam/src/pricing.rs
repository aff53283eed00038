//! Model and search pricing
//!
//! Prices are USD per 1K tokens. Lookup normalizes the model name (lowercase,
//! provider prefix dropped, dots turned into dashes) so that
//! `anthropic/claude-3.5-sonnet` and `claude-3-5-sonnet-20241022` share a row.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::llm::TokenUsage;

/// Fallback row for unknown models
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    models: BTreeMap<String, ModelPrice>,
    searches: BTreeMap<String, f64>,
    default_model: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        let models = [
            ("gpt-4o", ModelPrice::new(2.50, 10.00)),
            ("gpt-4-turbo", ModelPrice::new(10.00, 30.00)),
            ("gpt-4", ModelPrice::new(30.00, 60.00)),
            ("gpt-3.5-turbo", ModelPrice::new(0.50, 1.50)),
            ("gpt-5", ModelPrice::new(2.50, 10.00)),
            ("gpt-5-nano", ModelPrice::new(0.10, 0.40)),
            ("claude-3.5-sonnet", ModelPrice::new(3.00, 15.00)),
            ("gemini-2.5-flash", ModelPrice::new(0.075, 0.30)),
        ]
        .into_iter()
        .map(|(name, price)| (normalize(name), price))
        .collect();

        let searches = [("tavily".to_string(), 0.008), ("duckduckgo".to_string(), 0.0)]
            .into_iter()
            .collect();

        Self {
            models,
            searches,
            default_model: normalize(DEFAULT_MODEL),
        }
    }
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a model row
    pub fn with_model(mut self, name: &str, price: ModelPrice) -> Self {
        self.models.insert(normalize(name), price);
        self
    }

    /// Set the flat per-call price of a search provider
    pub fn with_search_price(mut self, provider: &str, per_call: f64) -> Self {
        self.searches.insert(provider.to_lowercase(), per_call);
        self
    }

    /// Price row for a model: exact match, then the longest contained key,
    /// then the default row.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        let key = normalize(model);
        if let Some(price) = self.models.get(&key) {
            return *price;
        }

        self.models
            .iter()
            .filter(|(name, _)| key.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price)
            .or_else(|| self.models.get(&self.default_model).copied())
            .unwrap_or(ModelPrice::new(0.0, 0.0))
    }

    pub fn completion_cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.price_for(model).cost(usage)
    }

    /// Flat cost of one search call; unknown providers are free
    pub fn search_cost(&self, provider: &str) -> f64 {
        self.searches
            .get(&provider.to_lowercase())
            .copied()
            .unwrap_or(0.0)
    }

    /// Rows in name order, for the pricing section of a report
    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPrice)> {
        self.models.iter().map(|(name, price)| (name.as_str(), price))
    }
}

fn normalize(model: &str) -> String {
    let lowered = model.trim().to_lowercase();
    let bare = lowered.rsplit('/').next().unwrap_or(&lowered);
    bare.replace('.', "-")
}
