//! Bounded retries for the synchronous push RPCs.

use std::future::Future;
use std::time::Duration;

use config::shared::RetryConfig;
use tracing::{error, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, ShuffleResult};
use crate::{bail, shuffle_error};

/// Runs an operation until it succeeds, fails with a non-retryable error or runs out of retries.
///
/// Attempts are separated by a fixed backoff. Shutdown is checked before every attempt but does
/// not interrupt a backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_retries: u32,
    backoff: Duration,
    shutdown: ShutdownRx,
}

impl RetryExecutor {
    pub fn new(config: &RetryConfig, shutdown: ShutdownRx) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
            shutdown,
        }
    }

    /// Runs `operation`, passing it the 1-based attempt number.
    ///
    /// When retries are exhausted the last failure is returned. Failures outside of the I/O
    /// class are wrapped into an [`ErrorKind::RpcFailed`] error keeping the failure as source.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &'static str,
        mut operation: F,
    ) -> ShuffleResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ShuffleResult<T>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.shutdown.is_shutdown() {
                info!(
                    operation = operation_name,
                    attempt, "shutdown requested, stopping retries"
                );
                break;
            }

            let err = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt, "operation succeeded after retrying"
                        );
                    }

                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "operation failed with a non-retryable error"
                );
                last_error = Some(err);
                break;
            }

            if attempt < max_attempts {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms = self.backoff.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying after backoff"
                );
                tokio::time::sleep(self.backoff).await;
            } else {
                error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "operation failed, retries exhausted"
                );
            }

            last_error = Some(err);
        }

        let Some(err) = last_error else {
            bail!(
                ErrorKind::Cancelled,
                "Shuffle client is shutting down",
                format!("{operation_name} was not attempted")
            );
        };

        if err.kind().is_io() {
            return Err(err);
        }

        Err(shuffle_error!(
            ErrorKind::RpcFailed,
            "Push RPC failed",
            format!("{operation_name} failed"),
            source: err
        ))
    }
}
