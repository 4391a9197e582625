//! Bounded retry with exponential backoff.

use lbkeeper_chain::ChainError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::ExecutionConfig;

/// Errors that know whether another attempt can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        ChainError::is_retryable(self)
    }
}

/// `base * 2^(n-1)`, capped at `max`. `n` is 1-based.
pub fn exponential_delay(base: Duration, max: Duration, n: u32) -> Duration {
    let factor = 1u32.checked_shl(n.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.retry_base_delay(),
            config.retry_max_delay(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        exponential_delay(self.base_delay, self.max_delay, attempt)
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, E, F, Fut>(&self, op: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
