//! Bounded retry with backoff for store and remote calls.
//!
//! Exhaustion is reported in the returned [`Retried`], never raised, so callers can
//! record a per-resource failure and move on.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::Error;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Store(_) | Error::Io(_) | Error::Timeout(_) => true,
            Error::Remote(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the given retry (1 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32
                    .checked_shl(retry.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                std::cmp::min(base.saturating_mul(factor), *max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(20),
        }
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Backoff delays slept between attempts.
    pub delays: Vec<Duration>,
}

impl<T, E> Retried<T, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delays = Vec::new();
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                    delays,
                };
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff.delay(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
                delays.push(delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(operation, attempts = attempt, error = %e, "Giving up after retries");
                }
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                    delays,
                };
            }
        }
    }
}
