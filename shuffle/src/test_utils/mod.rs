//! Utilities for testing the push client without shuffle workers.
//!
//! - [`client`] builds a client wired to the mocks and offers polling helpers.
//! - [`transport`] provides in-memory implementations of the transport and lifecycle manager
//!   traits that record every request and let tests decide when and how batches complete.
//! - [`notify`] provides [`notify::ActivitySignal`] so tests wait for mock activity with a deadline.
//! - [`failpoints`] configures fail points for the duration of a test.

pub mod client;
pub mod failpoints;
pub mod notify;
pub mod transport;
