//! Retry logic for initial connects.
//!
//! # Design Decisions
//! - Bounded attempts; exhaustion returns a recoverable `Connection` error
//! - Only timeouts and connection/operation failures are retried
//! - An open breaker stops the loop immediately

use std::future::Future;

use crate::error::{ServiceError, ServiceResult};
use crate::resilience::backoff::BackoffPolicy;

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    service: &str,
    policy: &BackoffPolicy,
    mut attempt: F,
) -> ServiceResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let mut last_error = String::new();
    for n in 1..=policy.max_attempts {
        match attempt(n).await {
            Ok(value) => {
                if n > 1 {
                    tracing::info!(service = %service, attempt = n, "Connected after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                last_error = e.to_string();
                if n < policy.max_attempts {
                    let delay = policy.delay(n);
                    tracing::warn!(
                        service = %service,
                        attempt = n,
                        max_attempts = policy.max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Connect attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ServiceError::Connection {
        service: service.to_string(),
        attempts: policy.max_attempts,
        reason: last_error,
    })
}
