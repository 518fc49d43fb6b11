//! Bounded retries with linear backoff, plus a deadline wrapper.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::model::RetryPolicy;

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// What a retried operation produced and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Runs an operation up to `max_attempts` times.
///
/// The wait before attempt `k` (k >= 2) is `delay + backoff * (k - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    max_attempts: u32,
    delay: Duration,
    backoff: Duration,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryController {
    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: Duration::ZERO,
        }
    }

    /// Build from a metric's policy; a missing or disabled policy runs once.
    pub fn from_policy(policy: Option<&RetryPolicy>) -> Self {
        match policy {
            Some(p) if p.enabled => Self {
                max_attempts: p.max_attempts.max(1),
                delay: Duration::from_millis(p.delay_ms),
                backoff: Duration::from_millis(p.backoff_ms),
            },
            _ => Self::once(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.delay + self.backoff.saturating_mul(attempt - 1)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned on failure.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let wait = self.delay_before(attempt);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    let more = attempt < self.max_attempts && e.is_retryable();
                    if !more {
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                    tracing::warn!("Attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    attempt += 1;
                }
            }
        }
    }
}

/// Caps the total time of a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Duration);

impl Deadline {
    /// `None` when the deadline passed first; the future is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout(self.0, fut).await.ok()
    }
}
