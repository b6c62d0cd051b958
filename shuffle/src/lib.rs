//! Client side of a push-based shuffle service.
//!
//! Map tasks stream their output to shuffle workers through a [`push::ShuffleClient`]. The
//! client frames every buffer as a numbered batch, bounds the number of unacknowledged batches
//! per worker, keeps a task's batches ordered across connection switches, retries transient
//! failures of the synchronous messages and migrates to a new location when a worker reports
//! that a location is full. Connections and the control plane are provided by the caller
//! through the traits in [`transport`].

pub mod concurrency;
pub mod error;
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod protocol;
pub mod push;
pub mod runtime;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod types;
