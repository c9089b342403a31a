//! Process-wide table of live sessions and plain HTTP connections.
//!
//! One instance is created at startup and handed to the listener, the bridge
//! and the shutdown sequencer. Entries are weak references: the bridge and the
//! listener own what they track. Registration hands back a guard that removes
//! the entry on drop, so racing close paths and explicit removal are both
//! harmless.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use thiserror::Error;

use crate::net::connection::{ConnectionId, HttpConnection};
use crate::session::handle::{Session, SessionId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session id {0} is already registered")]
    DuplicateSessionId(SessionId),
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, Weak<Session>>,
    connections: HashMap<ConnectionId, Weak<HttpConnection>>,
}

/// Point-in-time copy of the registry contents.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    pub sessions: Vec<Arc<Session>>,
    pub connections: Vec<Arc<HttpConnection>>,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.connections.is_empty()
    }
}

#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Refuses (and logs) a duplicate id without touching
    /// the existing entry.
    pub fn register(self: &Arc<Self>, session: &Arc<Session>) -> Result<SessionRegistration, RegistryError> {
        let id = session.id();
        {
            let mut tables = self.write();
            if tables.sessions.contains_key(&id) {
                tracing::error!(session_id = %id, "Refusing duplicate session registration");
                return Err(RegistryError::DuplicateSessionId(id));
            }
            tables.sessions.insert(id, Arc::downgrade(session));
        }
        tracing::debug!(session_id = %id, "Session registered");
        Ok(SessionRegistration {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn unregister(&self, id: &SessionId) {
        if self.write().sessions.remove(id).is_some() {
            tracing::debug!(session_id = %id, "Session unregistered");
        }
    }

    /// Track a plain HTTP connection until the returned guard drops.
    pub fn track_http_connection(self: &Arc<Self>, connection: &Arc<HttpConnection>) -> ConnectionRegistration {
        let id = connection.id();
        self.write()
            .connections
            .insert(id, Arc::downgrade(connection));
        ConnectionRegistration {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Stop tracking a connection. Unknown ids are ignored.
    pub fn untrack_http_connection(&self, id: &ConnectionId) {
        self.write().connections.remove(id);
    }

    /// Copy out every live entry. Holds the read lock only while copying.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let tables = self.read();
        RegistrySnapshot {
            sessions: tables.sessions.values().filter_map(Weak::upgrade).collect(),
            connections: tables
                .connections
                .values()
                .filter_map(Weak::upgrade)
                .collect(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    pub fn contains_session(&self, id: &SessionId) -> bool {
        self.read().sessions.contains_key(id)
    }

    // A panic while holding the lock cannot leave the maps half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unregisters its session when dropped.
#[derive(Debug)]
pub struct SessionRegistration {
    registry: Arc<Registry>,
    id: SessionId,
}

impl SessionRegistration {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// Untracks its connection when dropped.
#[derive(Debug)]
pub struct ConnectionRegistration {
    registry: Arc<Registry>,
    id: ConnectionId,
}

impl Drop for ConnectionRegistration {
    fn drop(&mut self) {
        self.registry.untrack_http_connection(&self.id);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.session_count())
            .field("connections", &self.connection_count())
            .finish()
    }
}
