//! Tavily backend
//!
//! One HTTP request per call with typed status mapping. Retries and the
//! per-call timeout are applied by the caller through
//! [`crate::retry::call_with_retry`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{SearchHit, SearchProvider};
use crate::error::{ConfigError, SearchError};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `advanced` costs two credits per call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    #[default]
    General,
    News,
}

pub struct TavilySearch {
    api_key: String,
    client: Client,
    base_url: String,
    timeout: Duration,
    search_depth: SearchDepth,
    topic: Topic,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
            search_depth: SearchDepth::default(),
            topic: Topic::default(),
        }
    }

    /// Key from `TAVILY_API_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("TAVILY_API_KEY").map_err(|_| ConfigError::Missing("TAVILY_API_KEY"))?;
        Ok(Self::new(api_key))
    }

    /// Point at another endpoint (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_search_depth(mut self, depth: SearchDepth) -> Self {
        self.search_depth = depth;
        self
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = topic;
        self
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: SearchDepth,
    topic: Topic,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let request = TavilyRequest {
            query,
            max_results: k,
            search_depth: self.search_depth,
            topic: self.topic,
            include_answer: false,
            include_raw_content: false,
        };

        debug!(query = %query, k, "tavily search");

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(SearchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SearchError::from_status(status.as_u16(), detail));
        }

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .take(k)
            .map(|r| SearchHit::new(r.title, r.url, r.content))
            .collect())
    }

    fn name(&self) -> &str {
        "tavily"
    }
}
