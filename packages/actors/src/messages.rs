//! Messages understood by the worker and supervisor actors.

use queue_core::WorkerId;
use ractor::RpcReplyPort;

use db::DbError;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim a job; run it to completion and report the outcome.
    Poll,

    /// Stop the worker. Queued behind any job already running.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// List the worker loops this supervisor hosts.
    ListWorkers { reply: RpcReplyPort<Vec<WorkerId>> },

    /// Ask every worker to exit after its current job.
    Shutdown,

    /// Periodic tick for housekeeping.
    Tick,
}

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Failed to spawn actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}
