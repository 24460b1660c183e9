//! Lifecycle notifications from worker loops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, WorkerId};

/// Events emitted by worker loops as jobs move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A worker claimed a job.
    JobClaimed {
        job_id: JobId,
        worker_id: WorkerId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job exited with code 0.
    JobCompleted {
        job_id: JobId,
        worker_id: WorkerId,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job failed and will be retried after its backoff delay.
    JobFailed {
        job_id: JobId,
        worker_id: WorkerId,
        exit_code: i32,
        error: String,
        attempts: u32,
        next_eligible_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    /// A job exhausted its retries and moved to the dead letter queue.
    JobDead {
        job_id: JobId,
        worker_id: WorkerId,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// Stale claims were returned to pending by the lease reaper.
    JobsReclaimed {
        job_ids: Vec<JobId>,
        timestamp: DateTime<Utc>,
    },

    /// A worker loop started and registered itself.
    WorkerStarted {
        worker_id: WorkerId,
        timestamp: DateTime<Utc>,
    },
    /// A worker loop exited.
    WorkerStopped {
        worker_id: WorkerId,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// When the event happened.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobClaimed { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::JobDead { timestamp, .. } => *timestamp,
            JobEvent::JobsReclaimed { timestamp, .. } => *timestamp,
            JobEvent::WorkerStarted { timestamp, .. } => *timestamp,
            JobEvent::WorkerStopped { timestamp, .. } => *timestamp,
        }
    }

    /// The job the event is about. Worker and reaper events carry none.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobClaimed { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::JobDead { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Whether the event ends a job's automatic processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::JobCompleted { .. } | JobEvent::JobDead { .. })
    }

    /// One line for a terminal.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobClaimed {
                job_id,
                worker_id,
                attempt,
                ..
            } => format!("Job {} claimed by {} (attempt {})", job_id, worker_id, attempt),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                next_eligible_at,
                ..
            } => match next_eligible_at {
                Some(at) => format!("Job {} failed: {} (retry after {})", job_id, error, at),
                None => format!("Job {} failed: {}", job_id, error),
            },
            JobEvent::JobDead {
                job_id, attempts, ..
            } => format!("Job {} moved to DLQ after {} attempts", job_id, attempts),
            JobEvent::JobsReclaimed { job_ids, .. } => {
                format!("Reclaimed {} stale job(s)", job_ids.len())
            }
            JobEvent::WorkerStarted { worker_id, .. } => format!("Worker {} started", worker_id),
            JobEvent::WorkerStopped { worker_id, .. } => format!("Worker {} stopped", worker_id),
        }
    }
}
