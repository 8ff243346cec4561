//! Bounded retry with exponential backoff for idempotent gateway calls.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::ports::GatewayError;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff.
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Backoff before retry number `attempt` (zero-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

/// Runs an idempotent gateway operation, retrying transient failures.
///
/// Only `ProviderUnavailable` and `Timeout` are retried; everything else
/// returns immediately.
pub async fn retry_idempotent<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    f: F,
) -> Result<T, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(operation, attempt = attempt + 1, "Gateway call succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= policy.max_retries => {
                warn!(
                    operation,
                    attempt = attempt + 1,
                    kind = %err.kind,
                    error = %err.message,
                    "Gateway call failed after max retries"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = policy.backoff_duration(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    kind = %err.kind,
                    backoff_ms = backoff.as_millis() as u64,
                    "Gateway call failed, retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
