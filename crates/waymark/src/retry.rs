//! Bounded retry with a flat delay.
//!
//! `retry(op, n, delay)` runs `op` at most `n + 1` times, sleeping `delay`
//! between failed attempts, and hands back the first success or the last
//! error unchanged. There is no backoff, no jitter and no per-attempt timeout.

use crate::config::{keys, ConfigManager};
use std::future::Future;
use std::time::Duration;

/// Default delay between attempts (1 second)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Retry policy for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the first attempt (0 = run once)
    pub max_retries: u32,
    /// Flat delay between attempts
    pub base_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryOptions {
    /// Create a policy
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Single attempt, no delay
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Build from `retry.maxAttempts` and `retry.baseDelay`.
    ///
    /// `maxAttempts` counts the first attempt, so it maps to
    /// `max_retries = maxAttempts - 1`. `retry.exponentialBackoff` is not read.
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        let attempts: u32 = config.get(keys::RETRY_MAX_ATTEMPTS, 1);
        let delay_ms: u64 = config.get(keys::RETRY_BASE_DELAY, DEFAULT_RETRY_DELAY_MS);
        Self::new(attempts.saturating_sub(1), Duration::from_millis(delay_ms))
    }

    /// Set the retry count
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between attempts
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Run `operation` under this policy
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry(operation, self.max_retries, self.base_delay).await
    }
}

/// Invoke `operation` until it succeeds or `max_retries` retries are spent
pub async fn retry<T, E, F, Fut>(
    mut operation: F,
    max_retries: u32,
    delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(err);
                }
                tracing::debug!(attempt, max_retries, "attempt failed, retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
