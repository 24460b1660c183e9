//! Lookup of the worker pool hosted by this process.

use std::sync::{LazyLock, PoisonError, RwLock};

use ractor::ActorRef;

use crate::messages::SupervisorMessage;

/// Handles to the worker pool running in this process.
///
/// Lets `stop_workers` reach a local pool directly. Workers in other
/// processes are only visible through the persisted worker registry.
pub struct ActorRegistry {
    supervisor: RwLock<Option<ActorRef<SupervisorMessage>>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self {
            supervisor: RwLock::new(None),
        }
    }

    /// Replaces any previously registered supervisor.
    pub fn register_supervisor(&self, supervisor: ActorRef<SupervisorMessage>) {
        *self.supervisor.write().unwrap_or_else(PoisonError::into_inner) = Some(supervisor);
    }

    /// Forget the supervisor, if it is still the registered one.
    pub fn unregister_supervisor(&self, supervisor: &ActorRef<SupervisorMessage>) {
        let mut slot = self.supervisor.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| s.get_id() == supervisor.get_id()) {
            *slot = None;
        }
    }

    pub fn get_supervisor(&self) -> Option<ActorRef<SupervisorMessage>> {
        self.supervisor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for ActorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: LazyLock<ActorRegistry> = LazyLock::new(ActorRegistry::new);

/// The registry shared by every pool in this process.
pub fn global_registry() -> &'static ActorRegistry {
    &REGISTRY
}
