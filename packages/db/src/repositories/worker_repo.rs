//! Worker registry repository.
//!
//! Every worker loop keeps a record here while it runs. The record is how
//! `status` finds workers in other processes and how `worker stop` reaches
//! them: setting `stop_requested` asks the worker to exit after its current
//! job, and the worker sees it on its next heartbeat.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use queue_core::{JobId, WorkerId, WorkerInfo};

use crate::records::{WorkerRecord, to_millis};
use crate::{get_db, DbError};

/// Repository for worker registry operations.
pub struct WorkerRepository;

impl WorkerRepository {
    /// Add a worker to the registry.
    pub async fn register(info: &WorkerInfo) -> Result<WorkerInfo, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(r#"UPSERT type::thing("worker", $id) CONTENT $record RETURN AFTER"#)
            .bind(("id", info.id.to_string()))
            .bind(("record", WorkerRecord::from(info)))
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        let registered = records
            .into_iter()
            .next()
            .map(WorkerInfo::try_from)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to register worker".into()))?;
        info!(worker_id = %registered.id, pid = registered.pid, "Registered worker");
        Ok(registered)
    }

    /// Refresh a worker's heartbeat and current job.
    ///
    /// Returns `None` if the worker's record is gone, e.g. pruned as stale.
    pub async fn heartbeat(
        id: WorkerId,
        current_job: Option<JobId>,
    ) -> Result<Option<WorkerInfo>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(
                r#"
                UPDATE type::thing("worker", $id)
                SET heartbeat_at = $now, current_job = $current_job
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", to_millis(Utc::now())))
            .bind(("current_job", current_job.map(|j| j.value())))
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        records.into_iter().next().map(WorkerInfo::try_from).transpose()
    }

    /// Remove a worker from the registry.
    pub async fn deregister(id: WorkerId) -> Result<(), DbError> {
        let db = get_db()?;

        db.query(r#"DELETE type::thing("worker", $id)"#)
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        debug!(worker_id = %id, "Deregistered worker");
        Ok(())
    }

    /// All registered workers, oldest first.
    pub async fn list() -> Result<Vec<WorkerInfo>, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT * FROM worker ORDER BY started_at ASC")
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        records.into_iter().map(WorkerInfo::try_from).collect()
    }

    /// Ask every registered worker to exit after its current job.
    ///
    /// Returns the number of workers signalled.
    pub async fn request_stop_all() -> Result<usize, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("UPDATE worker SET stop_requested = true RETURN AFTER")
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        info!(count = records.len(), "Requested workers to stop");
        Ok(records.len())
    }

    /// Drop workers that have not reported in for longer than `stale_after`.
    ///
    /// Returns the number of records removed.
    pub async fn prune_stale(stale_after: Duration) -> Result<usize, DbError> {
        Self::prune_stale_at(stale_after, Utc::now()).await
    }

    /// Prune as of `now`.
    pub async fn prune_stale_at(stale_after: Duration, now: DateTime<Utc>) -> Result<usize, DbError> {
        let db = get_db()?;

        let stale_after = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(stale_after).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut response = db
            .query("DELETE worker WHERE heartbeat_at < $cutoff RETURN BEFORE")
            .bind(("cutoff", to_millis(cutoff)))
            .await?;
        let records: Vec<WorkerRecord> = response.take(0)?;

        if !records.is_empty() {
            debug!(count = records.len(), "Pruned stale workers");
        }
        Ok(records.len())
    }
}
