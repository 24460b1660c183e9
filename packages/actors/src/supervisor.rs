//! Supervisor actor hosting a pool of worker loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use queue_core::{JobEvent, WorkerId};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use db::repositories::{JobRepository, WorkerRepository};

use crate::executor::CommandRunner;
use crate::messages::{SupervisorMessage, WorkerMessage};
use crate::registry::global_registry;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Housekeeping cadence when no lease is configured.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Registry entries silent for this long are removed.
const PRUNE_AFTER: Duration = Duration::from_secs(300);

/// Supervisor startup arguments.
pub struct SupervisorArgs {
    /// Number of worker loops to host.
    pub worker_count: usize,
    pub runner: Arc<dyn CommandRunner>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Return claims older than this to pending. `None` leaves them alone.
    pub lease: Option<Duration>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    /// Live worker actors by actor ID.
    workers: HashMap<ActorId, (WorkerId, ActorRef<WorkerMessage>)>,
    runner: Arc<dyn CommandRunner>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    lease: Option<Duration>,
    event_tx: broadcast::Sender<JobEvent>,
    /// Set once shutdown begins; failed workers are no longer replaced.
    shutting_down: bool,
    /// Tells workers to stop retrying reports against an unreachable store.
    shutdown: watch::Sender<bool>,
}

impl SupervisorState {
    /// Worker IDs in this pool.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.values().map(|(id, _)| *id).collect();
        ids.sort_by_key(|id| id.0);
        ids
    }
}

/// A claim is only reaped once its worker has missed a few heartbeats.
fn reap_after(lease: Duration, heartbeat_interval: Duration) -> Duration {
    lease.max(heartbeat_interval * 3)
}

fn tick_interval(lease: Option<Duration>) -> Duration {
    match lease {
        Some(lease) => (lease / 2).clamp(Duration::from_secs(1), TICK_INTERVAL),
        None => TICK_INTERVAL,
    }
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = WorkerId::new();
    let args = WorkerArgs {
        worker_id,
        runner: state.runner.clone(),
        poll_interval: state.poll_interval,
        heartbeat_interval: state.heartbeat_interval,
        event_tx: Some(state.event_tx.clone()),
        shutdown: state.shutdown.subscribe(),
    };

    let (actor, _handle) = Actor::spawn_linked(
        Some(format!("worker-{}", worker_id)),
        WorkerActor,
        args,
        myself.get_cell(),
    )
    .await
    .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(actor.get_id(), (worker_id, actor));
    Ok(())
}

/// Supervisor actor that manages worker loops.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(workers = args.worker_count, lease = ?args.lease, "Starting worker supervisor");

        let mut state = SupervisorState {
            workers: HashMap::new(),
            runner: args.runner,
            poll_interval: args.poll_interval,
            heartbeat_interval: args.heartbeat_interval,
            lease: args.lease,
            event_tx: args.event_tx,
            shutting_down: false,
            shutdown: watch::Sender::new(false),
        };

        for _ in 0..args.worker_count {
            spawn_worker(&myself, &mut state).await?;
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let every = tick_interval(state.lease);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        global_registry().register_supervisor(myself.clone());
        Ok(state)
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        global_registry().unregister_supervisor(&myself);
        info!("Worker supervisor stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::ListWorkers { reply } => {
                let _ = reply.send(state.worker_ids());
            }

            SupervisorMessage::Shutdown => {
                info!(workers = state.workers.len(), "Stopping workers after their current jobs");
                state.shutting_down = true;
                state.shutdown.send_replace(true);
                for (_, worker) in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                if state.workers.is_empty() {
                    myself.stop(None);
                }
            }

            SupervisorMessage::Tick => {
                if let Some(lease) = state.lease {
                    let lease = reap_after(lease, state.heartbeat_interval);
                    match JobRepository::reap_expired(lease).await {
                        Ok(jobs) if !jobs.is_empty() => {
                            let _ = state.event_tx.send(JobEvent::JobsReclaimed {
                                job_ids: jobs.iter().map(|j| j.id).collect(),
                                timestamp: Utc::now(),
                            });
                        }
                        Ok(_) => debug!("No expired leases found"),
                        Err(e) => warn!(error = %e, "Error during lease reaping"),
                    }
                }

                match WorkerRepository::prune_stale(PRUNE_AFTER).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Removed stale worker records"),
                    Err(e) => warn!(error = %e, "Failed to prune worker registry"),
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, failure) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                debug!(reason = ?reason, "Worker terminated");
                (cell, None)
            }
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err)),
            _ => return Ok(()),
        };

        if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
            if let Some(err) = failure {
                error!(worker_id = %worker_id, error = %err, "Worker failed");
                if !state.shutting_down {
                    spawn_worker(&myself, state).await?;
                    info!("Started replacement worker");
                }
            }
        }

        if state.workers.is_empty() {
            info!("All workers stopped");
            myself.stop(None);
        }
        Ok(())
    }
}

/// Start a supervisor hosting `args.worker_count` worker loops.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor, args).await
}
