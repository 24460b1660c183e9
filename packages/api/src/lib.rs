//! Queue operations for front ends.
//!
//! This crate is the boundary the CLI talks to:
//! - Job management (enqueue, show, list, reset)
//! - Worker pools (start, stop, status)
//! - Dead letter queue (list, retry)
//! - Configuration (show, get, set)

mod config;
mod dlq;
mod error;
mod init;
mod jobs;
mod workers;

pub use config::*;
pub use dlq::*;
pub use error::ApiError;
pub use init::*;
pub use jobs::*;
pub use workers::*;

// Re-export core types for convenience
pub use queue_core::{
    ConfigKey, Job, JobEvent, JobId, JobState, NewJob, QueueConfig, StatusSnapshot, WorkerId,
};
