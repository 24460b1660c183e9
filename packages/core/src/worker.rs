//! Worker identity and registry entries.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::JobId;

/// Unique identifier for a worker loop, unique across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Ulid);

impl WorkerId {
    /// Create a new unique worker ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a worker ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker's entry in the shared registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// OS process hosting the worker loop.
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Last time the worker reported in.
    pub heartbeat_at: DateTime<Utc>,
    /// Job currently being executed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobId>,
    /// Set by `worker stop`; the worker exits after its current job.
    #[serde(default)]
    pub stop_requested: bool,
}

impl WorkerInfo {
    pub fn new(id: WorkerId, pid: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            pid,
            started_at: now,
            heartbeat_at: now,
            current_job: None,
            stop_requested: false,
        }
    }

    /// A worker is alive if it has reported in within `stale_after`.
    pub fn is_alive(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> bool {
        now.signed_duration_since(self.heartbeat_at) <= stale_after
    }
}
