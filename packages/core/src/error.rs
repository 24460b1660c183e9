//! Validation errors raised before anything is persisted.

use thiserror::Error;

/// Rejected input: a bad config key or value, or an unusable command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Command must not be empty")]
    EmptyCommand,
    #[error("Unknown config key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Unknown job state: {0}")]
    UnknownState(String),
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

impl ValidationError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
