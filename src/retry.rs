//! Bounded retry driver for judge calls.
//!
//! Each grading component expresses one try as `attempt(n) -> Result<T, E>`;
//! the driver owns the counter and stops at the first success. The caller
//! decides what fallback value to produce from [`RetryExhausted`].

use std::fmt::Display;
use std::future::Future;

/// How many times a unit of work may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    /// Attempts actually made; a zero budget still runs once.
    pub fn effective_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: usize,
    pub last_error: E,
}

/// Run `attempt` with 1-based attempt numbers until it succeeds or the
/// policy's budget is spent.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut attempt: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.effective_attempts();
    let mut n = 1;
    loop {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(err) if n >= attempts => {
                tracing::error!(label, attempts, error = %err, "retry budget exhausted");
                return Err(RetryExhausted {
                    attempts,
                    last_error: err,
                });
            }
            Err(err) => {
                tracing::warn!(label, attempt = n, error = %err, "attempt failed, retrying");
                n += 1;
            }
        }
    }
}
