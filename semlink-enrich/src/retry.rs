//! Bounded retry with exponential backoff
//!
//! External lookups retry a fixed number of attempts. The operation gets
//! the 1-based attempt number so later attempts can change the request
//! (shorter definition, longer timeout). On exhaustion the last error is
//! returned; callers decide whether that becomes a sentinel.

use std::future::Future;
use std::time::{Duration, Instant};

const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// Attempt budget and initial delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }

    /// Entity lookups: one retry with reduced parameters
    pub const fn entity() -> Self {
        Self::new(2, Duration::ZERO)
    }

    /// Page-view lookups: three attempts
    pub const fn statistics() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// `policy.max_attempts` is spent.
pub async fn retry_with_policy<F, Fut, T, E, R>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
    should_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= max_attempts || !should_retry(&err) {
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );

                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
