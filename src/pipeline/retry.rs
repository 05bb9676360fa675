//! Deadlines and bounded retries for remote calls.
//!
//! Every remote call runs under [`with_timeout`]. Idempotent reads
//! (transcription, embedding, retrieval) go through [`with_retry`], which
//! retries transient failures with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default base delay in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
/// Default cap on a single delay in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 2_000;
/// Default backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Retry policy with exponential backoff.
///
/// # Examples
///
/// ```
/// use parley::pipeline::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default().with_max_retries(1);
/// assert_eq!(policy.max_retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth).
    pub max_delay_ms: u64,
    /// Backoff multiplier (2.0 doubles the delay each retry).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// `min(base * multiplier^(attempt-1), max_delay)` plus 0-10% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.base_delay_ms as f64;
        let max = self.max_delay_ms as f64;
        let exp = self.backoff_multiplier.powi(attempt as i32 - 1);
        let delay = (base * exp).min(max);

        let jitter = delay * (rand::random::<f64>() * 0.1);
        Duration::from_millis((delay + jitter) as u64)
    }
}

/// Run `fut` under `timeout`, mapping expiry to [`ProviderError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(format!(
            "{what} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Call `op` until it succeeds, fails permanently, or the policy's retries
/// are used up. Each attempt runs under `timeout`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    what: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut retry_attempt = 0u32;

    loop {
        match with_timeout(timeout, what, op()).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() || retry_attempt >= policy.max_retries {
                    return Err(error);
                }
                retry_attempt += 1;
                let delay = policy.delay_for_attempt(retry_attempt);
                tracing::warn!(
                    call = what,
                    attempt = retry_attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
