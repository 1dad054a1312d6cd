//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::service::PartTransferError;

/// Retry limits and backoff shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts for registration calls and each part upload (including the first).
    pub max_attempts: u32,
    /// Attempts for file and package finalize calls.
    pub finalize_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            finalize_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Errors that know whether a retry may help.
pub(crate) trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ServiceError {
    fn is_retryable(&self) -> bool {
        ServiceError::is_retryable(self)
    }
}

impl Retryable for PartTransferError {
    fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub(crate) enum RetryError<E> {
    Cancelled,
    Exhausted { attempts: u32, error: E },
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached.
///
/// Cancellation interrupts both the backoff sleep and an in-flight attempt.
/// `on_retry` sees the failed attempt number, its error and the delay.
pub(crate) async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    max_attempts: u32,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(u32, &E, Duration),
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op(attempt) => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && error.is_retryable() => {
                let delay = policy.delay_for_attempt(attempt);
                on_retry(attempt, &error, delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(error) => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}

/// Applies a per-call timeout, reporting expiry as [`ServiceError::Timeout`].
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(ServiceError::Timeout))
}
