//! Bounded wait + linear backoff for backend calls

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::caller::CallError;

/// Retry budget shared by the extraction caller and the embedding provider
///
/// Attempt `n` (1-based) that fails with a retryable error waits `n * backoff`
/// before the next one. After `max_retries` extra attempts the last error is
/// wrapped in [`CallError::RetriesExhausted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_ms: u64, timeout_secs: u64) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// No retries, immediate failure (tests)
    pub fn none(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
            timeout,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CallError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() && attempt > 1 => {
                    return Err(CallError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}
