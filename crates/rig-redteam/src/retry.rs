//! Retry policy and per-call timeout wrapper
//!
//! Every external call (completion, search, link check) goes through
//! [`call_with_retry`]. An elapsed timeout is a failed attempt like any other.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Errors that know whether another attempt can succeed
pub trait RetryableError: Display {
    /// Check if this error is retryable
    fn is_retryable(&self) -> bool;

    /// Error to report when an attempt exceeds the per-call timeout
    fn timed_out(after: Duration) -> Self;
}

/// Retry policy for failed external calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first call
    pub max_retries: usize,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set backoff base duration
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set maximum backoff duration
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Calculate delay for a given retry attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt as u32);
        let delay = self.backoff_base.saturating_mul(multiplier);
        delay.min(self.backoff_max)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_retries
    }

    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Run `op` under `call_timeout`, retrying retryable failures per `policy`.
///
/// At most `policy.max_retries + 1` attempts are made. A non-retryable error
/// is returned immediately.
pub async fn call_with_retry<T, E, F, Fut>(policy: &RetryPolicy, call_timeout: Duration, label: &str, op: F) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    call_with_retry_observed(policy, call_timeout, label, op, || {}).await
}

/// [`call_with_retry`] with a hook for attempts cut off by `call_timeout`.
///
/// A dropped attempt never runs the code after its await point, so callers
/// that account for every attempt do it for timeouts in `on_timeout`.
pub async fn call_with_retry_observed<T, E, F, Fut, O>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    label: &str,
    mut op: F,
    mut on_timeout: O,
) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    O: FnMut(),
{
    let mut retries = 0;

    loop {
        let outcome = match timeout(call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => {
                on_timeout();
                Err(E::timed_out(call_timeout))
            }
        };

        match outcome {
            Ok(value) => {
                if retries > 0 {
                    debug!(call = label, retries, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && policy.should_retry(retries) => {
                let delay = policy.delay_for_attempt(retries);
                warn!(
                    call = label,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "call failed, will retry"
                );
                sleep(delay).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
