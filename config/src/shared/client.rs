use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{PushConfig, ValidationError};

/// Top-level configuration of a shuffle client instance.
///
/// One client serves one application; every request it sends is scoped by the shuffle key
/// derived from [`ShuffleClientConfig::application_id`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShuffleClientConfig {
    /// Identifier of the application whose map output is pushed.
    pub application_id: String,
    /// Push flow control and retry settings.
    #[serde(default)]
    pub push: PushConfig,
}

impl ShuffleClientConfig {
    /// Creates a configuration with default push settings.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            push: PushConfig::default(),
        }
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.application_id.trim().is_empty() {
            return Err(ValidationError::EmptyApplicationId);
        }

        self.push.validate()
    }
}

impl Config for ShuffleClientConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
