//! DuckDuckGo search via the HTML endpoint (no API key)
//!
//! DuckDuckGo has no free web-search API, so result links are scraped from
//! the HTML page. Result anchors carry the target in a `uddg=` redirect
//! parameter; titles and snippets come from the `result__a` and
//! `result__snippet` elements.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::{extract_domain, SearchHit, SearchProvider};
use crate::error::SearchError;

const DEFAULT_BASE_URL: &str = "https://html.duckduckgo.com";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/html/?q={}", self.base_url, urlencoding::encode(query));
        debug!(url = %url, "Fetching search results");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SearchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::from_status(status.as_u16(), body));
        }

        let body = response.text().await.map_err(SearchError::from_reqwest)?;
        let hits = parse_results(&body, k);
        if hits.is_empty() {
            warn!(query = %query, "No search results found");
        }
        Ok(hits)
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

/// Parse up to `k` results out of a DuckDuckGo HTML page
pub(crate) fn parse_results(html: &str, k: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let mut seen = HashSet::new();

    for block in html.split("class=\"result__a\"").skip(1) {
        if hits.len() >= k {
            break;
        }

        let Some(url) = block_url(block) else {
            continue;
        };
        if url.contains("duckduckgo.com") || !seen.insert(url.clone()) {
            continue;
        }

        let title = element_text(block)
            .filter(|t| !t.is_empty())
            .or_else(|| extract_domain(&url))
            .unwrap_or_else(|| "Result".to_string());

        let snippet = block
            .split("class=\"result__snippet\"")
            .nth(1)
            .and_then(element_text)
            .unwrap_or_default();

        hits.push(SearchHit::new(title, url, snippet));
    }

    hits
}

/// Target URL of a result anchor: the decoded `uddg=` parameter, or a plain href
fn block_url(block: &str) -> Option<String> {
    let href_start = block.find("href=\"")? + 6;
    let href = &block[href_start..];
    let href = &href[..href.find('"')?];

    if let Some(encoded) = href.split("uddg=").nth(1) {
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        let decoded = urlencoding::decode(encoded).ok()?.into_owned();
        return decoded.starts_with("http").then_some(decoded);
    }

    if href.starts_with("//") {
        Some(format!("https:{}", href))
    } else if href.starts_with("http") {
        Some(href.to_string())
    } else {
        None
    }
}

/// Text content of the element whose opening tag starts `fragment`, tags stripped
fn element_text(fragment: &str) -> Option<String> {
    let open_end = fragment.find('>')? + 1;
    let rest = &fragment[open_end..];
    let close = rest.find("</a>").or_else(|| rest.find("</"))?;

    let mut text = String::new();
    let mut in_tag = false;
    for c in rest[..close].chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    Some(
        text.replace("&amp;", "&")
            .replace("&#x27;", "'")
            .replace("&quot;", "\"")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r##"
        <div class="result">
          <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn&amp;rut=abc">Learn <b>Rust</b></a>
          <a class="result__snippet" href="#">The Rust book &amp; more.</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://tokio.rs/">Tokio</a>
          <a class="result__snippet" href="#">An async runtime.</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn">Duplicate</a>
        </div>
    "##;

    #[test]
    fn test_parse_results_decodes_redirects() {
        let hits = parse_results(PAGE, 10);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.rust-lang.org/learn");
        assert_eq!(hits[0].title, "Learn Rust");
        assert_eq!(hits[0].snippet, "The Rust book & more.");
        assert_eq!(hits[1].url, "https://tokio.rs/");
        assert_eq!(hits[1].snippet, "An async runtime.");
    }

    #[test]
    fn test_parse_results_respects_limit() {
        assert_eq!(parse_results(PAGE, 1).len(), 1);
        assert!(parse_results("<html></html>", 5).is_empty());
    }

    #[tokio::test]
    async fn test_search_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .and(query_param("q", "rust lang"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let search = DuckDuckGoSearch::new().with_base_url(server.uri());
        let hits = search.search("rust lang", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let search = DuckDuckGoSearch::new().with_base_url(server.uri());
        assert_eq!(search.search("q", 5).await.unwrap_err(), SearchError::RateLimited);
    }
}
