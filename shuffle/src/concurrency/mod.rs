//! Concurrency primitives shared by the push client.
//!
//! The [`shutdown`] module provides the broadcast cancellation signal observed by every wait in
//! the push path: in-flight admission waits, drain-before-switch waits and retry loops.

pub mod shutdown;
