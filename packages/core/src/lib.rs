//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and JobOutcome for work items
//! - QueueConfig for process-wide defaults
//! - BackoffPolicy for retry scheduling
//! - Worker identity and status snapshots
//! - Events for real-time updates

mod backoff;
mod config;
mod error;
mod events;
mod job;
mod status;
mod worker;

pub use backoff::{BackoffPolicy, RetryDecision};
pub use config::{ConfigKey, LogLevel, QueueConfig};
pub use error::ValidationError;
pub use events::JobEvent;
pub use job::{
    Job, JobId, JobOutcome, JobState, MAX_OUTPUT_CHARS, NewJob, SYNTHETIC_EXIT_CODE,
    truncate_output,
};
pub use status::{StatusSnapshot, WorkerStatus};
pub use worker::{WorkerId, WorkerInfo};
