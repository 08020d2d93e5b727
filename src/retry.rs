//! Bounded retry with exponential backoff for remote calls.
//!
//! Image and template uploads share one [`RetryPolicy`]. Every attempt runs
//! under a per-call timeout; a timeout counts as one failed attempt.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, initial_backoff: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            attempt_timeout,
        }
    }

    /// Sleeps between attempts: `initial, 2*initial, 4*initial, ...`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_backoff;
        (0..self.max_attempts.saturating_sub(1))
            .map(move |n| initial.saturating_mul(2u32.saturating_pow(n as u32)))
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable
    /// error, or attempts are exhausted. The closure receives the 1-based
    /// attempt number. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.attempt_timeout;
        let max_attempts = self.max_attempts;
        let mut attempt = 0usize;

        RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                let current = attempt;
                let label = label.to_string();
                let call = operation(current);
                async move {
                    let result = match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Upload(format!(
                            "request timed out after {}s",
                            timeout.as_secs_f32()
                        ))),
                    };
                    if let Err(e) = &result {
                        warn!(
                            "[{}] Attempt {}/{} failed: {}",
                            label, current, max_attempts, e
                        );
                    }
                    result
                }
            },
            |e: &Error| e.is_retryable(),
        )
        .await
    }
}

impl Error {
    /// Network-class failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upload(_) | Error::Http(_) | Error::Io(_))
    }
}
