//! Core identifiers shared by the push protocol components.

mod location;
mod task;

pub use location::{PartitionLocation, PartitionMode};
pub use task::{BatchId, TaskKey};

/// Identifier of a shuffle within an application.
pub type ShuffleId = i32;
