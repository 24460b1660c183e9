//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based runtime that hosts worker loops.
//!
//! # Architecture
//!
//! - `Supervisor` - Hosts a pool of workers and runs periodic housekeeping
//! - `WorkerActor` - Claims jobs, runs their commands and reports outcomes
//! - `CommandRunner` - Execution environment for job commands
//!
//! Workers coordinate only through the job store, so pools in separate
//! processes can share one queue.
//!
//! # Usage
//!
//! ```ignore
//! use actors::{HEARTBEAT_INTERVAL, ShellRunner, SupervisorArgs, SupervisorMessage, start_supervisor};
//!
//! let (event_tx, _) = tokio::sync::broadcast::channel(1024);
//! let (supervisor, handle) = start_supervisor(SupervisorArgs {
//!     worker_count: 2,
//!     runner: Arc::new(ShellRunner::new()),
//!     poll_interval: Duration::from_secs(1),
//!     heartbeat_interval: HEARTBEAT_INTERVAL,
//!     lease: None,
//!     event_tx,
//! })
//! .await?;
//!
//! supervisor.send_message(SupervisorMessage::Shutdown)?;
//! handle.await?;
//! ```

mod executor;
mod messages;
mod supervisor;
mod worker_actor;
pub mod registry;

pub use executor::{CommandRunner, ExecError, FnRunner, RunFuture, ShellRunner};
pub use messages::{ActorError, SupervisorMessage, WorkerMessage};
pub use registry::{ActorRegistry, global_registry};
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use worker_actor::{HEARTBEAT_INTERVAL, STALE_AFTER, WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
