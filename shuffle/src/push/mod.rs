//! Client side of the push protocol.
//!
//! [`client::ShuffleClient`] is the entry point. The other modules hold the per-task pieces it
//! is assembled from: batch sequencing and in-flight accounting ([`state`]), the connection
//! binding ([`binding`]), the retry loop of synchronous messages ([`retry`]) and the tracking of
//! ended map tasks ([`lifecycle`]).

pub mod binding;
pub mod client;
pub mod lifecycle;
pub mod retry;
pub mod state;

pub use client::ShuffleClient;
