//! Shared configuration types for the shuffle push client.

mod client;
mod push;
mod retry;

pub use client::ShuffleClientConfig;
pub use push::PushConfig;
pub use retry::RetryConfig;

use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The application id is empty.
    #[error("`application_id` cannot be empty")]
    EmptyApplicationId,
    /// A field has a value outside its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
