//! Worker pool control and status.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use actors::{
    ActorError, ActorRef, CommandRunner, HEARTBEAT_INTERVAL, STALE_AFTER, ShellRunner,
    SupervisorArgs, SupervisorMessage, global_registry, start_supervisor,
};
use db::repositories::{ConfigRepository, JobRepository, WorkerRepository};
use queue_core::{JobEvent, StatusSnapshot, ValidationError, WorkerId};

use crate::ApiError;

/// Event buffer per pool; slow subscribers skip ahead.
const EVENT_CAPACITY: usize = 1024;

const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// A running pool of worker loops in this process.
pub struct WorkerPool {
    supervisor: ActorRef<SupervisorMessage>,
    handle: JoinHandle<()>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl WorkerPool {
    /// Subscribe to job and worker events from this pool.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// IDs of the workers in this pool.
    pub async fn worker_ids(&self) -> Result<Vec<WorkerId>, ApiError> {
        tokio::time::timeout(LIST_TIMEOUT, list_workers(&self.supervisor))
            .await
            .map_err(|_| ActorError::Actor("Timed out listing workers".into()))?
    }

    /// Ask every worker to exit once its current job is reported.
    pub fn shutdown(&self) -> Result<(), ApiError> {
        self.supervisor
            .send_message(SupervisorMessage::Shutdown)
            .map_err(|e| ActorError::Actor(e.to_string()))?;
        Ok(())
    }

    /// Wait until every worker has exited.
    pub async fn wait(self) -> Result<(), ApiError> {
        self.handle
            .await
            .map_err(|e| ActorError::Actor(format!("Worker supervisor panicked: {}", e)))?;
        Ok(())
    }

    /// Run until the workers exit on their own or `signal` fires, in which
    /// case the workers finish their current jobs and stop.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> Result<(), ApiError> {
        tokio::select! {
            joined = &mut self.handle => {
                joined.map_err(|e| ActorError::Actor(format!("Worker supervisor panicked: {}", e)))?;
                return Ok(());
            }
            _ = signal => {
                tracing::info!("Shutdown requested, waiting for running jobs");
                self.shutdown()?;
            }
        }
        self.wait().await
    }
}

async fn list_workers(
    supervisor: &ActorRef<SupervisorMessage>,
) -> Result<Vec<WorkerId>, ApiError> {
    let (tx, rx) = actors::concurrency::oneshot();
    supervisor
        .send_message(SupervisorMessage::ListWorkers { reply: tx.into() })
        .map_err(|e| ActorError::Actor(e.to_string()))?;
    rx.await
        .map_err(|_| ActorError::Actor("Failed to receive response".into()).into())
}

/// Start `count` workers running shell commands with the stored configuration.
pub async fn start_workers(count: usize) -> Result<WorkerPool, ApiError> {
    let config = ConfigRepository::get().await?;
    let runner = ShellRunner::new().with_timeout(config.job_timeout());
    start_workers_with(count, Arc::new(runner)).await
}

/// Start `count` workers executing jobs through `runner`.
pub async fn start_workers_with(
    count: usize,
    runner: Arc<dyn CommandRunner>,
) -> Result<WorkerPool, ApiError> {
    if count == 0 {
        return Err(ValidationError::invalid("count", "must be at least 1").into());
    }

    let config = ConfigRepository::get().await?;
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        worker_count: count,
        runner,
        poll_interval: config.poll_interval(),
        heartbeat_interval: HEARTBEAT_INTERVAL,
        lease: config.lease(),
        event_tx: event_tx.clone(),
    })
    .await
    .map_err(ActorError::from)?;

    tracing::info!(workers = count, "Worker pool started");
    Ok(WorkerPool {
        supervisor,
        handle,
        event_tx,
    })
}

/// Ask every registered worker, in any process, to exit after its current job.
///
/// Returns the number of workers signalled.
pub async fn stop_workers() -> Result<usize, ApiError> {
    let signalled = WorkerRepository::request_stop_all().await?;

    // Workers in this process stop right away instead of on their next heartbeat.
    if let Some(supervisor) = global_registry().get_supervisor() {
        let _ = supervisor.send_message(SupervisorMessage::Shutdown);
    }

    Ok(signalled)
}

/// Job counts per state and the registered workers.
pub async fn status_snapshot() -> Result<StatusSnapshot, ApiError> {
    let counts = JobRepository::count_by_state().await?;
    let workers = WorkerRepository::list().await?;

    let now = Utc::now();
    let stale_after = TimeDelta::from_std(STALE_AFTER).unwrap_or(TimeDelta::MAX);
    let workers = workers.into_iter().map(|info| {
        let alive = info.is_alive(now, stale_after);
        (info, alive)
    });

    Ok(StatusSnapshot::new(counts, workers, now))
}
