//! Storage shapes for domain types.
//!
//! Records carry timestamps as epoch milliseconds and ids as raw integers or
//! strings, matching the schema. Conversions back to domain types fail with
//! [`DbError::Serialization`] when stored data does not parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use queue_core::{Job, JobId, JobState, WorkerId, WorkerInfo};

use crate::DbError;

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Record key for a job id.
pub(crate) fn job_key(id: JobId) -> i64 {
    i64::try_from(id.value()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobRecord {
    pub seq: u64,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub backoff_base_seconds: f64,
    pub max_backoff_seconds: u64,
    #[serde(default)]
    pub next_eligible_at: Option<i64>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            seq: job.id.value(),
            command: job.command.clone(),
            state: job.state,
            attempts: job.attempts,
            max_retries: job.max_retries,
            backoff_base_seconds: job.backoff_base_seconds,
            max_backoff_seconds: job.max_backoff_seconds,
            next_eligible_at: job.next_eligible_at.map(to_millis),
            worker_id: job.worker_id.map(|w| w.to_string()),
            claimed_at: job.claimed_at.map(to_millis),
            last_error: job.last_error.clone(),
            exit_code: job.exit_code,
            output: job.output.clone(),
            created_at: to_millis(job.created_at),
            updated_at: to_millis(job.updated_at),
        }
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let worker_id = record
            .worker_id
            .as_deref()
            .map(WorkerId::parse)
            .transpose()
            .map_err(|e| DbError::Serialization(format!("job {}: worker_id: {}", record.seq, e)))?;

        Ok(Job {
            id: JobId::new(record.seq),
            command: record.command,
            state: record.state,
            attempts: record.attempts,
            max_retries: record.max_retries,
            backoff_base_seconds: record.backoff_base_seconds,
            max_backoff_seconds: record.max_backoff_seconds,
            next_eligible_at: record.next_eligible_at.map(from_millis),
            worker_id,
            claimed_at: record.claimed_at.map(from_millis),
            last_error: record.last_error,
            exit_code: record.exit_code,
            output: record.output,
            created_at: from_millis(record.created_at),
            updated_at: from_millis(record.updated_at),
        })
    }
}

/// Convert a batch of records, failing on the first bad one.
pub(crate) fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, DbError> {
    records.into_iter().map(Job::try_from).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WorkerRecord {
    pub worker_id: String,
    pub pid: u32,
    pub started_at: i64,
    pub heartbeat_at: i64,
    #[serde(default)]
    pub current_job: Option<u64>,
    #[serde(default)]
    pub stop_requested: bool,
}

impl From<&WorkerInfo> for WorkerRecord {
    fn from(info: &WorkerInfo) -> Self {
        Self {
            worker_id: info.id.to_string(),
            pid: info.pid,
            started_at: to_millis(info.started_at),
            heartbeat_at: to_millis(info.heartbeat_at),
            current_job: info.current_job.map(|id| id.value()),
            stop_requested: info.stop_requested,
        }
    }
}

impl TryFrom<WorkerRecord> for WorkerInfo {
    type Error = DbError;

    fn try_from(record: WorkerRecord) -> Result<Self, Self::Error> {
        let id = WorkerId::parse(&record.worker_id)
            .map_err(|e| DbError::Serialization(format!("worker {}: {}", record.worker_id, e)))?;
        Ok(WorkerInfo {
            id,
            pid: record.pid,
            started_at: from_millis(record.started_at),
            heartbeat_at: from_millis(record.heartbeat_at),
            current_job: record.current_job.map(JobId::new),
            stop_requested: record.stop_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::{NewJob, QueueConfig};

    #[test]
    fn job_record_keeps_millisecond_timestamps() {
        let now = from_millis(1_700_000_000_123);
        let mut job = Job::new(
            JobId::new(7),
            NewJob::new("echo hi").unwrap(),
            &QueueConfig::default(),
            now,
        );
        job.worker_id = Some(WorkerId::new());
        job.claimed_at = Some(now);

        let record = JobRecord::from(&job);
        assert_eq!(record.seq, 7);
        assert_eq!(record.created_at, 1_700_000_000_123);

        let back = Job::try_from(record).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn bad_worker_id_is_a_serialization_error() {
        let mut record = JobRecord::from(&Job::new(
            JobId::new(1),
            NewJob::new("true").unwrap(),
            &QueueConfig::default(),
            Utc::now(),
        ));
        record.worker_id = Some("not-a-ulid".into());
        assert!(matches!(Job::try_from(record), Err(DbError::Serialization(_))));
    }
}
