//! Exponential backoff without jitter.

use crate::config::BackoffConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule derived from [`BackoffConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to sleep after the given failed attempt (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// Delays between consecutive attempts; one fewer than `max_attempts`
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|attempt| self.delay_for(attempt))
    }

    /// Sum of all delays, i.e. the longest time a retried call can sleep
    pub fn total_delay(&self) -> Duration {
        self.delays().sum()
    }
}

/// What a retried operation wants after an attempt
#[derive(Debug)]
pub enum RetryDecision<T, E> {
    Done(T),
    /// Transient failure; try again if attempts remain
    Retry(E),
    /// Permanent failure; give up immediately
    Fail(E),
}

/// Run `operation` until it is done, fails permanently or attempts run out.
/// The last transient error is returned when attempts are exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    backoff: &ExponentialBackoff,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryDecision<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            RetryDecision::Done(value) => return Ok(value),
            RetryDecision::Fail(error) => return Err(error),
            RetryDecision::Retry(error) => {
                if attempt + 1 >= backoff.max_attempts() {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(error);
                }
                let delay = backoff.delay_for(attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = backoff.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
