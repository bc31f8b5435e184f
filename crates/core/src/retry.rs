//! Bounded retry with fixed backoff for remote operations.
//!
//! Only errors that report themselves as transient are retried. Everything
//! else is returned on the first failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::errors::{GitError, GitHubError, TransplantError};

/// Errors that may succeed on a later attempt.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for GitError {
    fn is_transient(&self) -> bool {
        GitError::is_transient(self)
    }
}

impl Transient for TransplantError {
    fn is_transient(&self) -> bool {
        TransplantError::is_transient(self)
    }
}

impl Transient for GitHubError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::HttpError(_) | Self::RateLimited { .. })
    }
}

/// `attempts` tries in total, sleeping `backoff` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_secs(config.backoff_secs))
    }

    /// A single attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run a blocking operation. Must not be called on an async executor
    /// thread; the backoff sleeps the current thread.
    pub fn run<T, E, F>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts && err.is_transient() => {
                    warn!(
                        operation,
                        attempt,
                        error = %err,
                        backoff_secs = self.backoff.as_secs(),
                        "transient failure, retrying"
                    );
                    std::thread::sleep(self.backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Async counterpart of [`run`](Self::run).
    pub async fn run_async<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts && err.is_transient() => {
                    warn!(
                        operation,
                        attempt,
                        error = %err,
                        backoff_secs = self.backoff.as_secs(),
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
