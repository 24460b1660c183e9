//! Errors returned by queue operations.

use actors::ActorError;
use db::DbError;
use queue_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Actor(#[from] ActorError),
    #[error("Invalid job payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl ApiError {
    /// The store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ApiError::Db(e) if e.is_unavailable())
    }
}
