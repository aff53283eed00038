//! Citation reachability checks
//!
//! A citation counts as reachable when the page answers 2xx without looking
//! like an error page, redirects, or refuses us with 401/403/429 (the page
//! exists, we just may not read it).

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::TokenUsage;
use crate::retry::{call_with_retry_observed, RetryPolicy, RetryableError};
use crate::usage::{CallKind, Component, UsageTracker};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Markers of soft-404 pages served with a 2xx status
const ERROR_PAGE_MARKERS: &[&str] = &[
    "page not found",
    "404 not found",
    "not found</h2>",
    "<title>404",
    "<h1>404",
    "<h2>404",
    "bad request",
    "invalid request",
];

/// Only the start of a page is inspected for error markers
const SNIFF_BYTES: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("malformed URL")]
    Malformed,

    #[error("timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("HTTP {0} but the page reads like an error page")]
    ErrorPage(u16),
}

impl RetryableError for LinkError {
    fn is_retryable(&self) -> bool {
        match self {
            LinkError::Timeout | LinkError::Request(_) => true,
            LinkError::Status(code) => *code >= 500,
            LinkError::Malformed | LinkError::ErrorPage(_) => false,
        }
    }

    fn timed_out(_after: Duration) -> Self {
        LinkError::Timeout
    }
}

/// Outcome for one citation
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCheck {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<LinkError>,
}

impl LinkCheck {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkReport {
    /// In the order the URLs were given
    pub checks: Vec<LinkCheck>,
}

impl LinkReport {
    /// Share of reachable citations; 1.0 when there are none
    pub fn valid_fraction(&self) -> f64 {
        if self.checks.is_empty() {
            return 1.0;
        }
        let valid = self.checks.iter().filter(|c| c.is_valid()).count();
        valid as f64 / self.checks.len() as f64
    }

    pub fn invalid(&self) -> impl Iterator<Item = &LinkCheck> {
        self.checks.iter().filter(|c| !c.is_valid())
    }
}

pub struct LinkValidator {
    client: Client,
    timeout: Duration,
    max_concurrent: usize,
    retry: RetryPolicy,
    usage: Option<Arc<UsageTracker>>,
}

impl Default for LinkValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkValidator {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            timeout: Duration::from_secs(15),
            max_concurrent: 10,
            retry: RetryPolicy::new(2),
            usage: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Record every request in `usage`
    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub async fn validate(&self, urls: &[String]) -> LinkReport {
        let checks: Vec<LinkCheck> = stream::iter(urls.iter().cloned())
            .map(|url| -> BoxFuture<'_, LinkCheck> { async move { self.check(&url).await }.boxed() })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let report = LinkReport { checks };
        debug!(
            checked = report.checks.len(),
            valid_fraction = report.valid_fraction(),
            "citations checked"
        );
        report
    }

    async fn check(&self, url: &str) -> LinkCheck {
        let clean = url.trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        let parsed = match Url::parse(clean) {
            Ok(parsed) if parsed.host_str().is_some() && parsed.scheme().starts_with("http") => parsed,
            _ => {
                return LinkCheck {
                    url: url.to_string(),
                    status: None,
                    error: Some(LinkError::Malformed),
                }
            }
        };

        let outcome = call_with_retry_observed(
            &self.retry,
            self.timeout,
            "link-check",
            || {
                let parsed = parsed.clone();
                async move {
                    let result = self.fetch(parsed).await;
                    self.record(url);
                    result
                }
            },
            || self.record(url),
        )
        .await;

        match outcome {
            Ok(status) => LinkCheck {
                url: url.to_string(),
                status: Some(status),
                error: None,
            },
            Err(e) => {
                warn!(url = %url, error = %e, "citation unreachable");
                let status = match &e {
                    LinkError::Status(code) | LinkError::ErrorPage(code) => Some(*code),
                    _ => None,
                };
                LinkCheck {
                    url: url.to_string(),
                    status,
                    error: Some(e),
                }
            }
        }
    }

    fn record(&self, url: &str) {
        if let Some(usage) = &self.usage {
            usage.record(Component::Evaluator, CallKind::LinkCheck, url, TokenUsage::default());
        }
    }

    async fn fetch(&self, url: Url) -> Result<u16, LinkError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LinkError::Timeout
            } else {
                LinkError::Request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                let text = response.text().await.unwrap_or_default();
                let sample: String = text.chars().take(SNIFF_BYTES).collect::<String>().to_lowercase();
                if ERROR_PAGE_MARKERS.iter().any(|marker| sample.contains(marker)) {
                    Err(LinkError::ErrorPage(status))
                } else {
                    Ok(status)
                }
            }
            300..=399 | 401 | 403 | 429 => Ok(status),
            _ => Err(LinkError::Status(status)),
        }
    }
}
