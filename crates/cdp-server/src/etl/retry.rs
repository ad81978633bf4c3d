//! Exponential backoff and retry orchestration.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::etl::error::{EtlError, EtlResult};

/// Backoff schedule for retryable failures.
///
/// The delay before retry `attempt` (0-based) is `base_delay * 2^attempt`,
/// capped at `max_delay`, with optional +/-50% jitter on top.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay before retry `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let scale = 2u32.saturating_pow(attempt);
        let capped = self.base_delay.saturating_mul(scale).min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // +/- 50% of the capped delay
        let jitter_ms = (capped.as_millis() as f64 * 0.5) as u64;
        let offset = fastrand::u64(0..=(jitter_ms * 2));
        let total_ms = capped.as_millis() as i64 + (offset as i64 - jitter_ms as i64);
        Duration::from_millis(total_ms.max(0) as u64)
    }
}

/// Run `f`, retrying on [`EtlError::Retryable`] per the policy.
///
/// Non-retryable errors pass through untouched. When retries are exhausted
/// the last retryable error is promoted to [`EtlError::Fatal`] so the caller
/// fails the run instead of looping.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> EtlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EtlResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) if err.is_retryable() => {
                warn!(operation, attempts = attempt + 1, error = %err, "retries exhausted");
                return Err(EtlError::fatal(format!(
                    "{operation}: retries exhausted after {} attempts: {err}",
                    attempt + 1
                )));
            },
            Err(err) => return Err(err),
        }
    }
}
