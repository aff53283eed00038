//! Web search backends
//!
//! Both backends return hits best-first. No hits is an ordinary answer;
//! only transport and API faults are errors.

pub mod duckduckgo;
pub mod tavily;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

pub use duckduckgo::DuckDuckGoSearch;
pub use tavily::{SearchDepth, TavilySearch, Topic};

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }

    /// Rendering used inside research prompts
    pub fn to_markdown(&self) -> String {
        format!("### [{}]({})\n{}\n", self.title, self.url, self.snippet)
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError>;

    /// Provider name, used for pricing and logs
    fn name(&self) -> &str;
}

/// Host part of `url`, if it parses as an absolute URL with one
pub fn extract_domain(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.rust-lang.org/learn"),
            Some("www.rust-lang.org".to_string())
        );
        assert_eq!(extract_domain("not a url"), None);
        assert_eq!(extract_domain("https://"), None);
    }

    #[test]
    fn test_hit_markdown() {
        let hit = SearchHit::new("Rust", "https://rust-lang.org", "A language");
        assert_eq!(hit.to_markdown(), "### [Rust](https://rust-lang.org)\nA language\n");
    }
}
