//! Metric names emitted by the push client.

/// Label for the shuffle id.
pub const SHUFFLE_ID_LABEL: &str = "shuffle_id";

/// Label for the worker push endpoint.
pub const ENDPOINT_LABEL: &str = "endpoint";

/// Label for a protocol status.
pub const STATUS_LABEL: &str = "status";

/// Counter of bytes handed to the transport, headers included.
pub const SHUFFLE_PUSH_BYTES_TOTAL: &str = "shuffle_push_bytes_total";

/// Gauge of batches sent to an endpoint and not yet acknowledged.
pub const SHUFFLE_PUSH_BATCHES_IN_FLIGHT: &str = "shuffle_push_batches_in_flight";

/// Counter of push failures recorded as a task's first error.
pub const SHUFFLE_PUSH_FAILURES_TOTAL: &str = "shuffle_push_failures_total";

/// Counter of pushes skipped because the mapper already ended.
pub const SHUFFLE_PUSH_SKIPPED_TOTAL: &str = "shuffle_push_skipped_total";

/// Counter of revive requests by resulting status.
pub const SHUFFLE_REVIVES_TOTAL: &str = "shuffle_revives_total";
