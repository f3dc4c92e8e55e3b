use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::warn;

use crate::{config::AppConfig, error::ServiceError};

/// Bounds for retried finalizer-class transactions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; the n-th retry waits n times this.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy derived from the runtime configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.finalize_max_attempts.max(1),
            base_delay: config.finalize_backoff_base,
        }
    }
}

/// Run `operation` until it succeeds, aborts, or exhausts the policy.
///
/// Only compare-and-update conflicts are retried: every other failure (and
/// every success, including a precondition-miss abort) is returned to the
/// caller as-is. The delay grows linearly with the attempt number.
pub async fn with_backoff<T, F, Fut>(
    name: &'static str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Err(ServiceError::Conflict(_)) if attempt < policy.max_attempts => {
                let delay = policy.base_delay * attempt;
                warn!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transaction conflicted; backing off before retry"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(ServiceError::Conflict(message)) => {
                warn!(
                    operation = name,
                    attempts = policy.max_attempts,
                    "transaction conflict retries exhausted"
                );
                return Err(ServiceError::Conflict(message));
            }
            other => return other,
        }
    }
}
