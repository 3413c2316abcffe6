// Bounded retry over async operations

use crate::error::{AppError, Result};
use std::future::Future;
use tracing::{info, warn};

/// Retry policy: re-run an async operation while a predicate accepts the
/// failure, up to a fixed number of re-invocations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// `max_retries` counts re-invocations after the first attempt, so the
    /// operation runs at most `1 + max_retries` times.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Run `op`, retrying only failures accepted by `retryable`.
    ///
    /// Returns the first success, or the last error once retries are
    /// exhausted or the predicate rejects the failure. Attempt counting is
    /// deterministic; there is no backoff delay - the supervised tool is
    /// local and either answers or is broken.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&AppError) -> bool,
    {
        let mut retries: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if retries < self.max_retries && retryable(&err) => {
                    retries += 1;
                    info!(
                        retry = %retries,
                        max_retries = %self.max_retries,
                        error = %err,
                        "Retrying after recoverable failure"
                    );
                }
                Err(err) => {
                    if retryable(&err) && self.max_retries > 0 {
                        warn!(
                            attempts = %(retries + 1),
                            error = %err,
                            "Max retry attempts reached"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
