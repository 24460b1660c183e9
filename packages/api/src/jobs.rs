//! Job management operations.

use serde::{Deserialize, Serialize};

use db::repositories::{ConfigRepository, JobFilter, JobRepository};
use queue_core::{Job, JobId, JobState, NewJob};

use crate::ApiError;

/// Request type for enqueueing a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub command: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    /// Parse a JSON payload such as `{"command": "echo hi", "max_retries": 2}`.
    pub fn from_json(payload: &str) -> Result<Self, ApiError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Validate into an enqueue request.
    pub fn into_new_job(self) -> Result<NewJob, ApiError> {
        let job = NewJob::new(self.command)?;
        Ok(match self.max_retries {
            Some(max_retries) => job.with_max_retries(max_retries)?,
            None => job,
        })
    }
}

/// Enqueue a shell command with the configured retry settings.
pub async fn enqueue(command: &str) -> Result<JobId, ApiError> {
    Ok(enqueue_job(NewJob::new(command)?).await?.id)
}

/// Enqueue a validated request, snapshotting the current configuration.
pub async fn enqueue_job(request: NewJob) -> Result<Job, ApiError> {
    let config = ConfigRepository::get().await?;
    Ok(JobRepository::create(request, &config).await?)
}

/// Get a job by ID.
pub async fn show_job(id: JobId) -> Result<Job, ApiError> {
    Ok(JobRepository::get(id).await?)
}

/// List jobs in id order, optionally filtered by state.
pub async fn list_jobs(state: Option<JobState>, limit: Option<usize>) -> Result<Vec<Job>, ApiError> {
    let filter = JobFilter { state, limit };
    Ok(JobRepository::list(filter).await?)
}

/// Return a job stuck in `processing` to `pending`.
pub async fn reset_job(id: JobId) -> Result<Job, ApiError> {
    Ok(JobRepository::reset_stuck(id).await?)
}
