//! Configuration for the shuffle push client.
//!
//! Holds the serde types consumed by the `shuffle` crate together with the hierarchical loader
//! used by processes embedding the client.

pub mod environment;
pub mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
