//! Connection Registry.
//!
//! Holds three views that must change together: live connections by id, the
//! identity each authenticated connection holds, and the running-module table
//! filled by `module_start`. All three sit behind one lock so attach, confirm,
//! register and detach are each a single atomic step.
//!
//! A connection attaches pending. It counts toward the connection limit but
//! holds no identity, receives no broadcasts and is not routable until
//! [`confirm`](ConnectionRegistry::confirm) binds its identity to it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use modhub_core::{ConnectionId, HubError};
use parking_lot::RwLock;
use serde::Serialize;

use crate::websocket::connection::ModuleConnection;

/// Why a connection could not be attached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    /// Another live connection already holds this identity.
    #[error("module identity '{0}' is already connected")]
    DuplicateIdentity(String),
    /// The connection limit is reached.
    #[error("connection limit of {0} reached")]
    Full(usize),
    /// The key store has no verify key for this identity.
    #[error("no verify key for module identity '{0}'")]
    UnknownIdentity(String),
}

/// A `module_start` registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningModule {
    /// Port the module announced.
    pub port: u16,
    /// Connection that registered it. `None` for the platform itself.
    #[serde(skip)]
    pub owner: Option<ConnectionId>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<ModuleConnection>>,
    /// Confirmed connections only.
    by_identity: HashMap<String, ConnectionId>,
    running: BTreeMap<String, RunningModule>,
}

/// Live module connections and their registrations.
pub struct ConnectionRegistry {
    max_connections: usize,
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections` connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Record a newly opened connection as pending.
    pub fn attach(&self, connection: Arc<ModuleConnection>) -> Result<(), AttachError> {
        let mut state = self.state.write();
        if state.by_identity.contains_key(&connection.identity) {
            return Err(AttachError::DuplicateIdentity(connection.identity.clone()));
        }
        if state.connections.len() >= self.max_connections {
            return Err(AttachError::Full(self.max_connections));
        }
        let _ = state.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Bind a pending connection to its identity and add it to the broadcast set.
    ///
    /// Returns `Ok(true)` when this call confirmed it, `Ok(false)` when it was
    /// already confirmed or is gone.
    pub fn confirm(&self, id: &ConnectionId) -> Result<bool, AttachError> {
        let mut state = self.state.write();
        let Some(identity) = state.connections.get(id).map(|c| c.identity.clone()) else {
            return Ok(false);
        };
        if let Some(holder) = state.by_identity.get(&identity) {
            return if holder == id {
                Ok(false)
            } else {
                Err(AttachError::DuplicateIdentity(identity))
            };
        }
        let _ = state.by_identity.insert(identity, id.clone());
        Ok(true)
    }

    /// Whether `id` holds its identity.
    pub fn is_confirmed(&self, id: &ConnectionId) -> bool {
        let state = self.state.read();
        state
            .connections
            .get(id)
            .is_some_and(|c| state.by_identity.get(&c.identity) == Some(id))
    }

    /// Pre-upgrade admission check: would [`attach`](Self::attach) succeed now?
    pub fn check_admission(&self, identity: &str) -> Result<(), AttachError> {
        let state = self.state.read();
        if state.by_identity.contains_key(identity) {
            return Err(AttachError::DuplicateIdentity(identity.to_owned()));
        }
        if state.connections.len() >= self.max_connections {
            return Err(AttachError::Full(self.max_connections));
        }
        Ok(())
    }

    /// Remove a connection, its broadcast membership and every module it registered.
    ///
    /// Returns the names of the registrations that were dropped.
    pub fn detach(&self, id: &ConnectionId) -> Vec<String> {
        let mut state = self.state.write();
        let Some(connection) = state.connections.remove(id) else {
            return Vec::new();
        };
        if state.by_identity.get(&connection.identity) == Some(id) {
            let _ = state.by_identity.remove(&connection.identity);
        }
        let owned: Vec<String> = state
            .running
            .iter()
            .filter(|(_, module)| module.owner.as_ref() == Some(id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            let _ = state.running.remove(name);
        }
        owned
    }

    /// Register `module_name` at `port`. First registration wins.
    pub fn register_module(
        &self,
        module_name: &str,
        port: u16,
        owner: Option<ConnectionId>,
    ) -> Result<(), HubError> {
        let mut state = self.state.write();
        if let Some(owner) = &owner {
            if !state.connections.contains_key(owner) {
                // The owner closed while this request was in flight.
                return Err(HubError::ModuleOffline {
                    module: module_name.to_owned(),
                });
            }
        }
        if state.running.contains_key(module_name) {
            return Err(HubError::AlreadyRunning {
                module_name: module_name.to_owned(),
            });
        }
        let _ = state
            .running
            .insert(module_name.to_owned(), RunningModule { port, owner });
        Ok(())
    }

    /// Running modules and their ports, sorted by name.
    pub fn running_modules(&self) -> BTreeMap<String, RunningModule> {
        self.state.read().running.clone()
    }

    /// Connection that should receive messages addressed to `to`.
    ///
    /// A `module_start` registration wins; otherwise the confirmed connection
    /// whose identity is `to`.
    pub fn resolve(&self, to: &str) -> Option<Arc<ModuleConnection>> {
        let state = self.state.read();
        let id = match state.running.get(to) {
            Some(RunningModule { owner: Some(owner), .. }) => Some(owner),
            Some(RunningModule { owner: None, .. }) => None,
            None => state.by_identity.get(to),
        }?;
        state.connections.get(id).cloned()
    }

    /// Snapshot of the broadcast set: every confirmed connection.
    pub fn snapshot(&self) -> Vec<Arc<ModuleConnection>> {
        let state = self.state.read();
        state
            .by_identity
            .values()
            .filter_map(|id| state.connections.get(id))
            .cloned()
            .collect()
    }

    /// Look up a connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ModuleConnection>> {
        self.state.read().connections.get(id).cloned()
    }

    /// Number of live connections, pending ones included.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of running-module registrations.
    pub fn running_count(&self) -> usize {
        self.state.read().running.len()
    }
}
