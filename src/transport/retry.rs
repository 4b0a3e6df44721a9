//! Bounded fixed-backoff retry for transport calls.
//!
//! Only transport errors classified retryable are retried; everything
//! else surfaces immediately. Exhausted retries surface the last error;
//! converting that into an instance failure is the caller's job.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Run `op` under the policy. `operation` names the call site in logs.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.attempts => {
                warn!(
                    target: "gangway::transport",
                    operation,
                    attempt,
                    max_attempts = policy.attempts,
                    error = %err,
                    "transport call failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
