//! Job repository for persistence and state transitions.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use queue_core::{Job, JobId, JobOutcome, JobState, NewJob, QueueConfig, WorkerId};

use crate::connection::is_conflict;
use crate::records::{JobRecord, into_jobs, job_key, to_millis};
use crate::{get_db, DbError, Dispatcher};

/// Attempts at bumping the id sequence before giving up.
const SEQUENCE_RETRIES: usize = 16;

/// Error recorded on jobs taken back from an expired claim.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// Repository for job persistence operations.
pub struct JobRepository;

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

const REPORT: &str = r#"
UPDATE type::thing("job", $seq)
SET state = $state,
    attempts = $attempts,
    next_eligible_at = $next_eligible_at,
    worker_id = NONE,
    claimed_at = NONE,
    last_error = $last_error,
    exit_code = $exit_code,
    output = $output,
    updated_at = $now
WHERE state = "processing"
    AND attempts = $prev_attempts
    AND ($owner = NONE OR worker_id = $owner)
RETURN AFTER
"#;

const REQUEUE_DEAD: &str = r#"
UPDATE type::thing("job", $seq)
SET state = "pending",
    attempts = 0,
    next_eligible_at = NONE,
    last_error = NONE,
    updated_at = $now
WHERE state = "dead"
RETURN AFTER
"#;

const RESET_STUCK: &str = r#"
UPDATE type::thing("job", $seq)
SET state = "pending",
    worker_id = NONE,
    claimed_at = NONE,
    next_eligible_at = NONE,
    updated_at = $now
WHERE state = "processing"
RETURN AFTER
"#;

const RENEW_CLAIM: &str = r#"
UPDATE type::thing("job", $seq)
SET claimed_at = $now
WHERE state = "processing" AND worker_id = $owner
RETURN AFTER
"#;

// Claims held by a worker that heartbeated within the lease are left alone.
const REAP_EXPIRED: &str = r#"
LET $live = (SELECT VALUE worker_id FROM worker WHERE heartbeat_at >= $cutoff);
UPDATE job
SET state = "pending",
    worker_id = NONE,
    claimed_at = NONE,
    next_eligible_at = NONE,
    last_error = $error,
    updated_at = $now
WHERE state = "processing"
    AND claimed_at < $cutoff
    AND worker_id NOTINSIDE $live
RETURN AFTER
"#;

#[derive(Debug, Deserialize)]
struct Counter {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct StateCount {
    state: JobState,
    count: u64,
}

impl JobRepository {
    /// Create a new pending job, assigning the next id.
    ///
    /// Retry settings are snapshotted from `config`.
    pub async fn create(request: NewJob, config: &QueueConfig) -> Result<Job, DbError> {
        let db = get_db()?;
        let id = Self::next_id().await?;
        let job = Job::new(id, request, config, Utc::now());

        let record: Option<JobRecord> = db
            .create(("job", job_key(id)))
            .content(JobRecord::from(&job))
            .await?;

        let job = record
            .map(Job::try_from)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?;
        info!(job_id = %job.id, command = %job.command, "Enqueued job");
        Ok(job)
    }

    /// Next value of the job id sequence.
    async fn next_id() -> Result<JobId, DbError> {
        let db = get_db()?;

        for _ in 0..SEQUENCE_RETRIES {
            let bumped = db
                .query("UPSERT sequence:job SET value += 1 RETURN AFTER")
                .await
                .and_then(|mut r| r.take::<Vec<Counter>>(0));

            match bumped {
                Ok(counters) => {
                    return counters
                        .into_iter()
                        .next()
                        .map(|c| JobId::new(c.value))
                        .ok_or_else(|| DbError::Query("Job id sequence returned nothing".into()));
                }
                Err(e) if is_conflict(&e) => tokio::task::yield_now().await,
                Err(e) => return Err(e.into()),
            }
        }

        Err(DbError::Query("Could not allocate a job id".into()))
    }

    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<JobRecord> = db.select(("job", job_key(id))).await?;

        record
            .map(Job::try_from)
            .transpose()?
            .ok_or_else(|| DbError::job_not_found(id))
    }

    /// List jobs in ascending id order with optional filtering.
    pub async fn list(filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let where_clause = if filter.state.is_some() {
            "WHERE state = $state"
        } else {
            ""
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY seq ASC {}",
            where_clause, limit_clause
        );

        let mut result = db.query(&query);
        if let Some(state) = filter.state {
            result = result.bind(("state", state.as_str()));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        into_jobs(records)
    }

    /// Number of jobs in each state that has at least one job.
    pub async fn count_by_state() -> Result<BTreeMap<JobState, u64>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT state, count() AS count FROM job GROUP BY state")
            .await?;
        let rows: Vec<StateCount> = response.take(0)?;

        Ok(rows.into_iter().map(|r| (r.state, r.count)).collect())
    }

    /// Atomically claim the next eligible job for `worker_id`.
    pub async fn try_claim(worker_id: WorkerId) -> Result<Option<Job>, DbError> {
        Dispatcher::claim(worker_id).await
    }

    /// Record the outcome of an attempt on a claimed job.
    ///
    /// Fails with [`DbError::NotProcessing`] if the job is not currently
    /// processing, which makes duplicate reports no-ops.
    pub async fn report_result(id: JobId, outcome: &JobOutcome) -> Result<Job, DbError> {
        Self::report(id, None, outcome, Utc::now()).await
    }

    /// Record an outcome as of `now`.
    pub async fn report_result_at(
        id: JobId,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<Job, DbError> {
        Self::report(id, None, outcome, now).await
    }

    /// Record an outcome only while `worker_id` still holds the claim.
    ///
    /// A worker whose claim was reaped and handed to another worker gets
    /// [`DbError::NotProcessing`] instead of overwriting the new attempt.
    pub async fn report_claimed(
        id: JobId,
        worker_id: WorkerId,
        outcome: &JobOutcome,
    ) -> Result<Job, DbError> {
        Self::report(id, Some(worker_id), outcome, Utc::now()).await
    }

    async fn report(
        id: JobId,
        owner: Option<WorkerId>,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<Job, DbError> {
        let db = get_db()?;

        let current = Self::get(id).await?;
        let owned = owner.is_none_or(|owner| current.worker_id == Some(owner));
        if current.state != JobState::Processing || !owned {
            return Err(DbError::NotProcessing(id));
        }

        let (next, decision) = current.record_outcome(outcome, now);
        let record = JobRecord::from(&next);

        let updated = db
            .query(REPORT)
            .bind(("seq", job_key(id)))
            .bind(("state", next.state.as_str()))
            .bind(("attempts", next.attempts))
            .bind(("next_eligible_at", record.next_eligible_at))
            .bind(("last_error", record.last_error))
            .bind(("exit_code", record.exit_code))
            .bind(("output", record.output))
            .bind(("now", to_millis(now)))
            .bind(("prev_attempts", current.attempts))
            .bind(("owner", owner.map(|w| w.to_string())))
            .await
            .and_then(|mut r| r.take::<Vec<JobRecord>>(0));

        let mut records = match updated {
            Ok(records) => records,
            // A concurrent transition won; the job is no longer ours to report on.
            Err(e) if is_conflict(&e) => return Err(DbError::NotProcessing(id)),
            Err(e) => return Err(e.into()),
        };

        let job = match records.pop() {
            Some(record) => Job::try_from(record)?,
            None => return Err(DbError::NotProcessing(id)),
        };

        debug!(job_id = %id, state = %job.state, attempts = job.attempts, ?decision, "Recorded job outcome");
        Ok(job)
    }

    /// Move a dead job back to pending with a fresh retry budget.
    pub async fn requeue_dead(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(REQUEUE_DEAD)
            .bind(("seq", job_key(id)))
            .bind(("now", to_millis(Utc::now())))
            .await?;
        let mut records: Vec<JobRecord> = response.take(0)?;

        match records.pop() {
            Some(record) => {
                info!(job_id = %id, "Requeued dead job");
                Job::try_from(record)
            }
            None => {
                // Distinguish a missing job from one that is not dead.
                Self::get(id).await?;
                Err(DbError::NotDead(id))
            }
        }
    }

    /// Return a job stuck in processing to pending, keeping its attempt count.
    pub async fn reset_stuck(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(RESET_STUCK)
            .bind(("seq", job_key(id)))
            .bind(("now", to_millis(Utc::now())))
            .await?;
        let mut records: Vec<JobRecord> = response.take(0)?;

        match records.pop() {
            Some(record) => {
                warn!(job_id = %id, "Reset stuck job to pending");
                Job::try_from(record)
            }
            None => {
                Self::get(id).await?;
                Err(DbError::NotProcessing(id))
            }
        }
    }

    /// Extend the claim `worker_id` holds on a running job.
    ///
    /// Returns `false` once the claim is gone, e.g. after a reset or a reap.
    pub async fn renew_claim(id: JobId, worker_id: WorkerId) -> Result<bool, DbError> {
        Self::renew_claim_at(id, worker_id, Utc::now()).await
    }

    /// Renew a claim as of `now`.
    pub async fn renew_claim_at(
        id: JobId,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(RENEW_CLAIM)
            .bind(("seq", job_key(id)))
            .bind(("owner", worker_id.to_string()))
            .bind(("now", to_millis(now)))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(!records.is_empty())
    }

    /// Return jobs claimed longer than `lease` ago to pending, unless their
    /// worker is still heartbeating.
    pub async fn reap_expired(lease: Duration) -> Result<Vec<Job>, DbError> {
        Self::reap_expired_at(lease, Utc::now()).await
    }

    /// Reap expired claims as of `now`.
    pub async fn reap_expired_at(lease: Duration, now: DateTime<Utc>) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let lease = TimeDelta::from_std(lease).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut response = db
            .query(REAP_EXPIRED)
            .bind(("error", LEASE_EXPIRED_ERROR))
            .bind(("now", to_millis(now)))
            .bind(("cutoff", to_millis(cutoff)))
            .await?;
        let records: Vec<JobRecord> = response.take(1)?;

        let jobs = into_jobs(records)?;
        if !jobs.is_empty() {
            warn!(count = jobs.len(), "Returned jobs with expired leases to pending");
        }
        Ok(jobs)
    }
}
