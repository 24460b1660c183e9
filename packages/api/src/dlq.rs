//! Dead letter queue management.
//!
//! Dead jobs are ordinary job records in the `dead` state. The manager only
//! lists them and routes requeues through the store, one job at a time, so a
//! failed requeue never stops the rest of a batch.

use std::future::Future;

use serde::Serialize;
use tracing::{info, warn};

use db::DbError;
use db::repositories::{JobFilter, JobRepository};
use queue_core::{Job, JobId, JobState};

use crate::ApiError;

/// Storage operations the dead letter queue needs.
pub trait DeadLetterStore: Send + Sync {
    /// Dead jobs in id order.
    fn list_dead(&self) -> impl Future<Output = Result<Vec<Job>, DbError>> + Send;

    /// Move one dead job back to pending with a fresh retry budget.
    fn requeue_dead(&self, id: JobId) -> impl Future<Output = Result<Job, DbError>> + Send;
}

/// The persistent job store.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStore;

impl DeadLetterStore for JobStore {
    async fn list_dead(&self) -> Result<Vec<Job>, DbError> {
        JobRepository::list(JobFilter::state(JobState::Dead)).await
    }

    async fn requeue_dead(&self, id: JobId) -> Result<Job, DbError> {
        JobRepository::requeue_dead(id).await
    }
}

/// A requeue that did not go through.
#[derive(Debug, Clone, Serialize)]
pub struct RetryFailure {
    pub job_id: JobId,
    pub error: String,
}

/// Result of requeueing every dead job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryAllReport {
    pub requeued: Vec<JobId>,
    pub failed: Vec<RetryFailure>,
}

impl RetryAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Query and command layer over dead jobs.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQueue<S = JobStore> {
    store: S,
}

impl<S: DeadLetterStore> DeadLetterQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Dead jobs in id order.
    pub async fn list(&self) -> Result<Vec<Job>, ApiError> {
        Ok(self.store.list_dead().await?)
    }

    /// Requeue one dead job.
    pub async fn retry_one(&self, id: JobId) -> Result<Job, ApiError> {
        Ok(self.store.requeue_dead(id).await?)
    }

    /// Requeue every dead job independently, collecting failures.
    ///
    /// Fails only if the dead jobs cannot be listed at all.
    pub async fn retry_all(&self) -> Result<RetryAllReport, ApiError> {
        let dead = self.store.list_dead().await?;
        let mut report = RetryAllReport::default();

        for job in dead {
            match self.store.requeue_dead(job.id).await {
                Ok(_) => report.requeued.push(job.id),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to requeue dead job");
                    report.failed.push(RetryFailure {
                        job_id: job.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            requeued = report.requeued.len(),
            failed = report.failed.len(),
            "Requeued dead letter queue"
        );
        Ok(report)
    }
}

/// Dead jobs in id order.
pub async fn dlq_list() -> Result<Vec<Job>, ApiError> {
    DeadLetterQueue::new(JobStore).list().await
}

/// Requeue one dead job.
pub async fn dlq_retry(id: JobId) -> Result<Job, ApiError> {
    DeadLetterQueue::new(JobStore).retry_one(id).await
}

/// Requeue every dead job.
pub async fn dlq_retry_all() -> Result<RetryAllReport, ApiError> {
    DeadLetterQueue::new(JobStore).retry_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use queue_core::{NewJob, QueueConfig};

    /// In-memory dead jobs; requeueing `poisoned` fails.
    struct MemoryStore {
        jobs: Mutex<BTreeMap<JobId, Job>>,
        poisoned: Option<JobId>,
    }

    impl MemoryStore {
        fn with_dead(count: u64, poisoned: Option<JobId>) -> Self {
            let jobs = (1..=count)
                .map(|n| {
                    let mut job = Job::new(
                        JobId::new(n),
                        NewJob::new("false").unwrap(),
                        &QueueConfig::default(),
                        Utc::now(),
                    );
                    job.state = JobState::Dead;
                    job.attempts = job.max_retries;
                    (job.id, job)
                })
                .collect();
            Self {
                jobs: Mutex::new(jobs),
                poisoned,
            }
        }

        fn state_of(&self, id: JobId) -> JobState {
            self.jobs.lock().unwrap()[&id].state
        }
    }

    impl DeadLetterStore for MemoryStore {
        async fn list_dead(&self) -> Result<Vec<Job>, DbError> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.values().filter(|j| j.state == JobState::Dead).cloned().collect())
        }

        async fn requeue_dead(&self, id: JobId) -> Result<Job, DbError> {
            if self.poisoned == Some(id) {
                return Err(DbError::Query("disk full".into()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| DbError::NotFound(format!("Job {}", id)))?;
            if job.state != JobState::Dead {
                return Err(DbError::NotDead(id));
            }
            job.state = JobState::Pending;
            job.attempts = 0;
            job.last_error = None;
            Ok(job.clone())
        }
    }

    #[tokio::test]
    async fn retry_all_continues_past_a_failed_requeue() {
        let poisoned = JobId::new(3);
        let dlq = DeadLetterQueue::new(MemoryStore::with_dead(5, Some(poisoned)));

        let report = dlq.retry_all().await.unwrap();

        assert_eq!(report.requeued.len(), 4);
        assert!(!report.requeued.contains(&poisoned));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].job_id, poisoned);
        assert!(!report.is_complete());

        for n in [1, 2, 4, 5] {
            assert_eq!(dlq.store.state_of(JobId::new(n)), JobState::Pending);
        }
        assert_eq!(dlq.store.state_of(poisoned), JobState::Dead);
        assert_eq!(dlq.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_one_rejects_live_jobs() {
        let dlq = DeadLetterQueue::new(MemoryStore::with_dead(1, None));
        dlq.retry_one(JobId::new(1)).await.unwrap();

        let again = dlq.retry_one(JobId::new(1)).await;
        assert!(matches!(again, Err(ApiError::Db(DbError::NotDead(_)))));

        let missing = dlq.retry_one(JobId::new(9)).await;
        assert!(matches!(missing, Err(ApiError::Db(DbError::NotFound(_)))));
    }
}
