use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for synchronous push-protocol RPCs (handshake, region start, region finish).
///
/// Backoff between attempts is fixed, not exponential.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt of a single RPC.
    ///
    /// Zero disables retrying. Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between two attempts, in milliseconds.
    ///
    /// Default: 5000ms
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl RetryConfig {
    /// Default number of retries.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default backoff between attempts in milliseconds.
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5000;

    /// Returns the backoff between attempts as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    RetryConfig::DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    RetryConfig::DEFAULT_RETRY_BACKOFF_MS
}
