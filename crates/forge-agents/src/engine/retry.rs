//! Retry with exponential back-off and jitter.
//!
//! Delay before retry `n` (1-based attempt that just failed):
//! `base × 2^(n-1) + uniform(0, max_jitter)`. Cancellation is never retried
//! and interrupts a pending back-off sleep.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::{GenerationError, GenerationResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_jitter_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic part of the delay after `attempt` failed.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay_for(attempt) + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Exhaustion yields
    /// `GenerationFailed` wrapping the last error.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> GenerationResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GenerationResult<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err(GenerationError::Cancelled),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        category = %e.retry_category(),
                        error = %e,
                        "Generation attempt failed"
                    );
                    if attempt < self.max_attempts {
                        let delay = self.delay_for(attempt);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or(GenerationError::EmptyResponse);
        Err(GenerationError::exhausted(self.max_attempts, last))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
