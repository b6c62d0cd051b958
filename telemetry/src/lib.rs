//! Tracing and metrics setup for processes embedding the shuffle client.

pub mod metrics;
pub mod tracing;

pub use crate::tracing::{LogFlusher, TracingError, init_test_tracing, init_tracing};
