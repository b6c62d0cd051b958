use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// Flow control, timeout and retry settings for pushing map output to shuffle workers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PushConfig {
    /// Maximum number of unacknowledged batches per worker endpoint.
    #[serde(default = "default_max_in_flight_batches_per_endpoint")]
    pub max_in_flight_batches_per_endpoint: usize,
    /// Timeout for push-data and the synchronous push RPCs, in milliseconds.
    #[serde(default = "default_push_rpc_timeout_ms")]
    pub push_rpc_timeout_ms: u64,
    /// Timeout for revive requests sent to the lifecycle manager, in milliseconds.
    #[serde(default = "default_revive_rpc_timeout_ms")]
    pub revive_rpc_timeout_ms: u64,
    /// How long a push may wait for in-flight batches to drain before failing, in milliseconds.
    #[serde(default = "default_limit_in_flight_timeout_ms")]
    pub limit_in_flight_timeout_ms: u64,
    /// Number of threads driving network I/O and push completions.
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
    /// Retry policy for synchronous RPCs.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl PushConfig {
    /// Default in-flight cap per endpoint.
    pub const DEFAULT_MAX_IN_FLIGHT_BATCHES_PER_ENDPOINT: usize = 16;

    /// Default push RPC timeout in milliseconds.
    pub const DEFAULT_PUSH_RPC_TIMEOUT_MS: u64 = 120_000;

    /// Default revive RPC timeout in milliseconds.
    pub const DEFAULT_REVIVE_RPC_TIMEOUT_MS: u64 = 60_000;

    /// Default in-flight wait timeout in milliseconds.
    pub const DEFAULT_LIMIT_IN_FLIGHT_TIMEOUT_MS: u64 = 240_000;

    /// Default number of I/O threads.
    pub const DEFAULT_IO_THREADS: usize = 8;

    pub fn push_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.push_rpc_timeout_ms)
    }

    pub fn revive_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.revive_rpc_timeout_ms)
    }

    pub fn limit_in_flight_timeout(&self) -> Duration {
        Duration::from_millis(self.limit_in_flight_timeout_ms)
    }

    /// Validates push settings.
    ///
    /// The in-flight cap and the I/O thread count must be non-zero, otherwise no push could
    /// ever be admitted or completed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_in_flight_batches_per_endpoint == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "push.max_in_flight_batches_per_endpoint".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.io_threads == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "push.io_threads".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            max_in_flight_batches_per_endpoint: default_max_in_flight_batches_per_endpoint(),
            push_rpc_timeout_ms: default_push_rpc_timeout_ms(),
            revive_rpc_timeout_ms: default_revive_rpc_timeout_ms(),
            limit_in_flight_timeout_ms: default_limit_in_flight_timeout_ms(),
            io_threads: default_io_threads(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_in_flight_batches_per_endpoint() -> usize {
    PushConfig::DEFAULT_MAX_IN_FLIGHT_BATCHES_PER_ENDPOINT
}

fn default_push_rpc_timeout_ms() -> u64 {
    PushConfig::DEFAULT_PUSH_RPC_TIMEOUT_MS
}

fn default_revive_rpc_timeout_ms() -> u64 {
    PushConfig::DEFAULT_REVIVE_RPC_TIMEOUT_MS
}

fn default_limit_in_flight_timeout_ms() -> u64 {
    PushConfig::DEFAULT_LIMIT_IN_FLIGHT_TIMEOUT_MS
}

fn default_io_threads() -> usize {
    PushConfig::DEFAULT_IO_THREADS
}
