#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use api::{
    ApiError, DeadLetterQueue, DeadLetterStore, JobStore, config_get, config_set, config_show,
    dlq_list, dlq_retry, enqueue, enqueue_job, list_jobs, reset_job, show_job, start_workers,
    start_workers_with, status_snapshot, stop_workers,
};
use actors::{FnRunner, RunFuture};
use common::TestResult;
use db::DbError;
use db::repositories::JobRepository;
use queue_core::{ConfigKey, Job, JobEvent, JobId, JobOutcome, JobState, NewJob, WorkerId};

const WAIT: Duration = Duration::from_secs(20);

/// Delegates to the real store but fails to requeue one job.
struct FailingStore {
    inner: JobStore,
    poisoned: JobId,
}

impl DeadLetterStore for FailingStore {
    async fn list_dead(&self) -> Result<Vec<Job>, DbError> {
        self.inner.list_dead().await
    }

    async fn requeue_dead(&self, id: JobId) -> Result<Job, DbError> {
        if id == self.poisoned {
            return Err(DbError::Query("injected failure".into()));
        }
        self.inner.requeue_dead(id).await
    }
}

/// Enqueue a job with no retries and fail its only attempt.
async fn dead_job(command: &str) -> Result<JobId, Box<dyn std::error::Error>> {
    let job = enqueue_job(NewJob::new(command)?.with_max_retries(1)?).await?;
    let claimed = JobRepository::try_claim(WorkerId::new()).await?.ok_or("claim")?;
    assert_eq!(claimed.id, job.id);
    let dead = JobRepository::report_result(job.id, &JobOutcome::failure(1, "", None)).await?;
    assert_eq!(dead.state, JobState::Dead);
    Ok(job.id)
}

#[test]
fn retry_all_requeues_everything_but_the_failed_job() -> TestResult {
    common::run(async {
        let _guard = common::setup_db().await?;

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(dead_job(&format!("exit {}", i + 1)).await?);
        }
        assert_eq!(dlq_list().await?.len(), 5);

        let poisoned = ids[2];
        let dlq = DeadLetterQueue::new(FailingStore {
            inner: JobStore,
            poisoned,
        });
        let report = dlq.retry_all().await?;

        assert_eq!(report.requeued.len(), 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].job_id, poisoned);

        for id in ids.iter().filter(|id| **id != poisoned) {
            let job = show_job(*id).await?;
            assert_eq!(job.state, JobState::Pending);
            assert_eq!(job.attempts, 0);
        }
        let remaining = dlq_list().await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, poisoned);

        let requeued = dlq_retry(poisoned).await?;
        assert_eq!(requeued.state, JobState::Pending);
        assert!(matches!(dlq_retry(poisoned).await, Err(ApiError::Db(DbError::NotDead(_)))));
        Ok(())
    })
}

#[test]
fn enqueue_list_and_status() -> TestResult {
    common::run(async {
        let _guard = common::setup_db().await?;

        let first = enqueue("echo one").await?;
        let second = enqueue("echo two").await?;
        assert!(matches!(enqueue("   ").await, Err(ApiError::Validation(_))));

        let all = list_jobs(None, None).await?;
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(list_jobs(Some(JobState::Pending), Some(1)).await?.len(), 1);
        assert!(list_jobs(Some(JobState::Dead), None).await?.is_empty());

        JobRepository::try_claim(WorkerId::new()).await?.ok_or("claim")?;
        let snapshot = status_snapshot().await?;
        assert_eq!(snapshot.count(JobState::Pending), 1);
        assert_eq!(snapshot.count(JobState::Processing), 1);
        assert_eq!(snapshot.count(JobState::Completed), 0);
        assert_eq!(snapshot.total(), 2);
        assert!(snapshot.workers.is_empty());

        let reset = reset_job(first).await?;
        assert_eq!(reset.state, JobState::Pending);
        assert!(matches!(reset_job(first).await, Err(ApiError::Db(DbError::NotProcessing(_)))));
        assert!(matches!(show_job(JobId::new(999)).await, Err(ApiError::Db(DbError::NotFound(_)))));
        Ok(())
    })
}

#[test]
fn config_round_trips_through_the_store() -> TestResult {
    common::run(async {
        let _guard = common::setup_db().await?;

        assert_eq!(config_get("max_retries").await?.1, "3");
        config_set("backoff-base-seconds", "1.5").await?;
        assert_eq!(config_get("backoff_base_seconds").await?, (ConfigKey::BackoffBaseSeconds, "1.5".to_string()));
        assert!(matches!(config_set("nope", "1").await, Err(ApiError::Validation(_))));
        assert!(matches!(config_set("log_level", "loud").await, Err(ApiError::Validation(_))));
        assert_eq!(config_show().await?.log_level.to_string(), "info");

        config_set("max_retries", "7").await?;
        let id = enqueue("echo configured").await?;
        assert_eq!(show_job(id).await?.max_retries, 7);
        Ok(())
    })
}

#[test]
fn worker_pool_runs_jobs_and_stops() -> TestResult {
    common::run(async {
        let _guard = common::setup_db().await?;
        config_set("poll_interval_ms", "20").await?;

        assert!(matches!(start_workers(0).await, Err(ApiError::Validation(_))));

        let runner = FnRunner::new(|job| -> RunFuture {
            let ok = job.command.starts_with("echo");
            Box::pin(async move {
                if ok {
                    JobOutcome::success("done")
                } else {
                    JobOutcome::failure(2, "", Some("nope".into()))
                }
            })
        });
        let pool = start_workers_with(2, Arc::new(runner)).await?;
        let mut events = pool.subscribe();
        assert_eq!(pool.worker_ids().await?.len(), 2);

        let id = enqueue("echo pooled").await?;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(JobEvent::JobCompleted { job_id, .. }) if job_id == id => break,
                    Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(e) => panic!("event stream closed: {}", e),
                }
            }
        })
        .await?;
        assert_eq!(show_job(id).await?.state, JobState::Completed);

        let snapshot = status_snapshot().await?;
        assert_eq!(snapshot.active_workers().count(), 2);

        assert_eq!(stop_workers().await?, 2);
        tokio::time::timeout(WAIT, pool.wait()).await??;
        assert!(status_snapshot().await?.workers.is_empty());
        Ok(())
    })
}

#[test]
fn new_job_defaults_come_from_stored_config() -> TestResult {
    common::run(async {
        let _guard = common::setup_db().await?;
        config_set("max_retries", "2").await?;
        let job = enqueue_job(NewJob::new("echo hi")?.with_max_retries(9)?).await?;
        assert_eq!(job.max_retries, 9);
        let default = enqueue_job(NewJob::new("echo hi")?).await?;
        assert_eq!(default.max_retries, 2);
        Ok(())
    })
}

#[test]
fn pool_drains_when_signalled() -> TestResult {
    common::run(async {
        let _guard = common::setup_db().await?;
        config_set("poll_interval_ms", "20").await?;

        let runner = FnRunner::new(|_job| -> RunFuture {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                JobOutcome::success("slow")
            })
        });
        let id = enqueue("sleep").await?;
        let pool = start_workers_with(1, Arc::new(runner)).await?;
        let mut events = pool.subscribe();

        // Signal while the job is running; it must still be reported.
        let signal = async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, JobEvent::JobClaimed { .. }) {
                    break;
                }
            }
        };
        tokio::time::timeout(WAIT, pool.run_until(signal)).await??;

        assert_eq!(show_job(id).await?.state, JobState::Completed);
        assert!(status_snapshot().await?.workers.is_empty());
        Ok(())
    })
}
