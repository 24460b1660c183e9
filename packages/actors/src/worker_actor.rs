//! Worker actor: the claim, execute, report loop.
//!
//! Each `Poll` claims at most one job, runs it inline and reports the
//! outcome, so messages sent to the worker while a job runs (including
//! `Shutdown`) are handled only after the job has been reported. A worker
//! never holds a store lock while its command runs.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use queue_core::{Job, JobEvent, JobId, JobState, WorkerId, WorkerInfo};
use ractor::{Actor, ActorProcessingErr, ActorRef, ActorStatus};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use db::DbError;
use db::repositories::{JobRepository, WorkerRepository};

use crate::executor::CommandRunner;
use crate::messages::WorkerMessage;

/// How often a worker refreshes its registry entry.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A worker that has not reported in for this long is considered gone.
pub const STALE_AFTER: Duration = Duration::from_secs(15);

/// Pauses between attempts at storing an outcome while the store is down.
const REPORT_BACKOFF: ReportBackoff = ReportBackoff {
    first: Duration::from_millis(200),
    max: Duration::from_secs(30),
};

#[derive(Debug, Clone, Copy)]
struct ReportBackoff {
    first: Duration,
    max: Duration,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: WorkerId,
    pub runner: Arc<dyn CommandRunner>,
    /// Sleep between empty claims.
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub event_tx: Option<broadcast::Sender<JobEvent>>,
    /// Flips to `true` when the pool is stopping.
    pub shutdown: watch::Receiver<bool>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: WorkerId,
    runner: Arc<dyn CommandRunner>,
    poll_interval: Duration,
    /// Current job, shared with the heartbeat task.
    current_job: watch::Sender<Option<JobId>>,
    event_tx: Option<broadcast::Sender<JobEvent>>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerActorState {
    fn emit(&self, event: JobEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let worker_id = args.worker_id;
        info!(worker_id = %worker_id, "Starting worker");

        WorkerRepository::register(&WorkerInfo::new(worker_id, std::process::id(), Utc::now()))
            .await?;

        let (current_job, current_rx) = watch::channel(None);
        let state = WorkerActorState {
            worker_id,
            runner: args.runner,
            poll_interval: args.poll_interval,
            current_job,
            event_tx: args.event_tx,
            shutdown: args.shutdown,
        };

        // Heartbeats run beside the actor so they keep flowing while a job executes.
        tokio::spawn(heartbeat_loop(
            myself.clone(),
            worker_id,
            current_rx,
            args.heartbeat_interval,
        ));

        state.emit(JobEvent::WorkerStarted {
            worker_id,
            timestamp: Utc::now(),
        });
        myself.send_message(WorkerMessage::Poll)?;

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Err(e) = WorkerRepository::deregister(state.worker_id).await {
            warn!(worker_id = %state.worker_id, error = %e, "Failed to deregister worker");
        }
        state.emit(JobEvent::WorkerStopped {
            worker_id: state.worker_id,
            timestamp: Utc::now(),
        });
        info!(worker_id = %state.worker_id, "Worker stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => match JobRepository::try_claim(state.worker_id).await {
                Ok(Some(job)) => {
                    process_job(state, job).await;
                    // Look for more work straight away.
                    myself.send_message(WorkerMessage::Poll)?;
                }
                Ok(None) => {
                    debug!(worker_id = %state.worker_id, "No eligible jobs");
                    schedule_poll(&myself, state.poll_interval);
                }
                Err(e) => {
                    warn!(worker_id = %state.worker_id, error = %e, "Claim failed; backing off");
                    schedule_poll(&myself, state.poll_interval);
                }
            },

            WorkerMessage::Shutdown => {
                info!(worker_id = %state.worker_id, "Shutting down worker");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

fn schedule_poll(myself: &ActorRef<WorkerMessage>, after: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        // The worker may have stopped in the meantime.
        let _ = myself.send_message(WorkerMessage::Poll);
    });
}

/// Execute a claimed job and record its outcome.
async fn process_job(state: &WorkerActorState, job: Job) {
    let worker_id = state.worker_id;
    let job_id = job.id;
    let attempt = job.attempts + 1;

    state.current_job.send_replace(Some(job_id));
    state.emit(JobEvent::JobClaimed {
        job_id,
        worker_id,
        attempt,
        timestamp: Utc::now(),
    });
    info!(worker_id = %worker_id, job_id = %job_id, attempt, command = %job.command, "Running job");

    let started = Instant::now();
    let outcome = state.runner.run(&job).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut shutdown = state.shutdown.clone();
    let report = || JobRepository::report_claimed(job_id, worker_id, &outcome);
    match report_with_retry(job_id, REPORT_BACKOFF, report, &mut shutdown).await {
        Ok(updated) => {
            let timestamp = Utc::now();
            let event = match updated.state {
                JobState::Completed => {
                    info!(worker_id = %worker_id, job_id = %job_id, duration_ms, "Job completed");
                    JobEvent::JobCompleted {
                        job_id,
                        worker_id,
                        attempts: updated.attempts,
                        duration_ms,
                        timestamp,
                    }
                }
                JobState::Dead => {
                    warn!(worker_id = %worker_id, job_id = %job_id, attempts = updated.attempts, "Job moved to dead letter queue");
                    JobEvent::JobDead {
                        job_id,
                        worker_id,
                        error: updated.last_error.clone().unwrap_or_default(),
                        attempts: updated.attempts,
                        timestamp,
                    }
                }
                _ => {
                    info!(
                        worker_id = %worker_id,
                        job_id = %job_id,
                        exit_code = outcome.exit_code,
                        next_eligible_at = ?updated.next_eligible_at,
                        "Job failed; will retry"
                    );
                    JobEvent::JobFailed {
                        job_id,
                        worker_id,
                        exit_code: outcome.exit_code,
                        error: updated.last_error.clone().unwrap_or_default(),
                        attempts: updated.attempts,
                        next_eligible_at: updated.next_eligible_at,
                        timestamp,
                    }
                }
            };
            state.emit(event);
        }
        Err(DbError::NotProcessing(_)) => {
            warn!(worker_id = %worker_id, job_id = %job_id, "Job was reset while running; discarding result");
        }
        Err(e) => {
            error!(
                worker_id = %worker_id,
                job_id = %job_id,
                exit_code = outcome.exit_code,
                error = %e,
                "Failed to record job outcome; job stays processing until reset or reaped"
            );
        }
    }

    state.current_job.send_replace(None);
}

/// Report an outcome, retrying while the store is unreachable.
///
/// Gives up only once the pool is stopping.
async fn report_with_retry<F, Fut>(
    job_id: JobId,
    backoff: ReportBackoff,
    mut report: F,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Job, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Job, DbError>>,
{
    let mut delay = backoff.first;
    let mut attempt: u64 = 1;
    loop {
        match report().await {
            Err(e) if e.is_unavailable() && !stopping(shutdown) => {
                warn!(job_id = %job_id, error = %e, attempt, "Store unavailable; retrying report");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
                delay = (delay * 2).min(backoff.max);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// A dropped sender means the supervisor is gone.
fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Refresh the registry entry, and the claim on the running job, until the
/// worker stops.
///
/// A stop request set by another process turns into a `Shutdown` message,
/// which the worker handles once its current job is reported. Heartbeats
/// continue until then so the claim stays live.
async fn heartbeat_loop(
    worker: ActorRef<WorkerMessage>,
    worker_id: WorkerId,
    mut current_rx: watch::Receiver<Option<JobId>>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    let mut stop_sent = false;
    interval.tick().await;
    loop {
        interval.tick().await;
        // The actor's state, and with it the sender, is gone once it stops.
        if current_rx.has_changed().is_err() || stopped(&worker) {
            break;
        }
        let current = *current_rx.borrow_and_update();

        if let Some(job_id) = current {
            match JobRepository::renew_claim(job_id, worker_id).await {
                Ok(true) => {}
                Ok(false) => debug!(worker_id = %worker_id, job_id = %job_id, "Claim no longer held"),
                Err(e) => warn!(worker_id = %worker_id, job_id = %job_id, error = %e, "Failed to renew claim"),
            }
        }

        match WorkerRepository::heartbeat(worker_id, current).await {
            Ok(Some(info)) if info.stop_requested && !stop_sent => {
                info!(worker_id = %worker_id, "Stop requested");
                stop_sent = worker.send_message(WorkerMessage::Shutdown).is_ok();
                if !stop_sent {
                    break;
                }
            }
            Ok(Some(_)) => {}
            // Deregistered by `post_stop`.
            Ok(None) if stopped(&worker) => break,
            Ok(None) => {
                warn!(worker_id = %worker_id, "Worker record missing; registering again");
                let mut info = WorkerInfo::new(worker_id, std::process::id(), Utc::now());
                info.current_job = current;
                if let Err(e) = WorkerRepository::register(&info).await {
                    warn!(worker_id = %worker_id, error = %e, "Failed to register worker");
                }
            }
            Err(e) => warn!(worker_id = %worker_id, error = %e, "Heartbeat failed"),
        }
    }
    debug!(worker_id = %worker_id, "Heartbeat loop exited");
}

fn stopped(worker: &ActorRef<WorkerMessage>) -> bool {
    worker.get_status() >= ActorStatus::Stopping
}

#[cfg(test)]
mod tests {
    use std::future::{Ready, ready};
    use std::sync::atomic::{AtomicU32, Ordering};

    use queue_core::{NewJob, QueueConfig};

    use super::*;

    const FAST: ReportBackoff = ReportBackoff {
        first: Duration::from_millis(1),
        max: Duration::from_millis(4),
    };

    fn processed_job() -> Result<Job, DbError> {
        let new_job = NewJob::new("true")?;
        Ok(Job::new(JobId::new(1), new_job, &QueueConfig::default(), Utc::now()))
    }

    /// Fails as unreachable `outages` times, then succeeds.
    fn flaky_store(
        outages: u32,
        calls: &AtomicU32,
    ) -> impl FnMut() -> Ready<Result<Job, DbError>> + '_ {
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            ready(if call < outages {
                Err(DbError::NotInitialized)
            } else {
                processed_job()
            })
        }
    }

    #[tokio::test]
    async fn report_outlasts_a_long_outage() {
        let calls = AtomicU32::new(0);
        let (_tx, mut shutdown) = watch::channel(false);

        let job = report_with_retry(JobId::new(1), FAST, flaky_store(12, &calls), &mut shutdown).await;

        assert!(job.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 13);
    }

    #[tokio::test]
    async fn report_gives_up_once_stopping() {
        let calls = AtomicU32::new(0);
        let (tx, mut shutdown) = watch::channel(false);
        tx.send_replace(true);

        let report = flaky_store(u32::MAX, &calls);
        let result = report_with_retry(JobId::new(1), FAST, report, &mut shutdown).await;

        assert!(matches!(result, Err(DbError::NotInitialized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_report_is_not_retried() {
        let calls = AtomicU32::new(0);
        let (_tx, mut shutdown) = watch::channel(false);
        let report = || {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(Err::<Job, _>(DbError::NotProcessing(JobId::new(1))))
        };

        let result = report_with_retry(JobId::new(1), FAST, report, &mut shutdown).await;

        assert!(matches!(result, Err(DbError::NotProcessing(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
