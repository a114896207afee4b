//! Identity registry: display name to connection mapping.
//!
//! The registry enforces the uniqueness invariant: at most one open
//! connection per display name, at most one display name per connection.
//! Mutations and the roster snapshot they trigger happen under one write
//! lock, so no event observes a half-applied membership change and no two
//! concurrent joins for the same name can both succeed.

use crate::connection::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Maximum display name length.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The display name belongs to another open connection.
    #[error("Username already taken: {0}")]
    NameTaken(String),

    /// The connection already holds a display name.
    #[error("Connection already identified as: {0}")]
    AlreadyIdentified(String),

    /// The display name is not acceptable.
    #[error("Invalid username: {0}")]
    InvalidName(&'static str),
}

/// Validate a display name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_username(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Username cannot be empty");
    }
    if name.len() > MAX_USERNAME_LENGTH {
        return Err("Username too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Username contains invalid characters");
    }
    Ok(())
}

/// A roster snapshot: the current display names, freshly projected from the
/// registry. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    /// Display names, sorted for deterministic output.
    pub users: Vec<String>,
    /// Number of identified connections.
    pub count: usize,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Arc<ConnectionHandle>>,
    by_conn: HashMap<ConnectionId, String>,
}

impl Inner {
    fn roster(&self) -> Roster {
        let mut users: Vec<String> = self.by_name.keys().cloned().collect();
        users.sort();
        let count = users.len();
        Roster { users, count }
    }
}

/// The identity registry.
///
/// Reads (`lookup`, `snapshot`) may run concurrently; each mutation takes
/// the write lock and returns the roster computed before the lock releases.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert of a display name.
    ///
    /// A stale entry whose owner connection has already closed does not
    /// block re-registration; it is reconciled inside the same write lock.
    ///
    /// # Errors
    ///
    /// Returns `NameTaken` if the name belongs to another open connection,
    /// `AlreadyIdentified` if this connection already holds a name, or
    /// `InvalidName` if the name fails validation.
    pub fn try_register(
        &self,
        name: &str,
        conn: &Arc<ConnectionHandle>,
    ) -> Result<Roster, RegistryError> {
        validate_username(name).map_err(RegistryError::InvalidName)?;

        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner.by_conn.get(conn.id()) {
            return Err(RegistryError::AlreadyIdentified(existing.clone()));
        }

        let stale_id = match inner.by_name.get(name) {
            Some(owner) if owner.is_closed() => Some(owner.id().clone()),
            Some(_) => return Err(RegistryError::NameTaken(name.to_string())),
            None => None,
        };
        if let Some(stale_id) = stale_id {
            // Stale entry: the owner disconnected but its session has not
            // finished cleanup yet.
            inner.by_name.remove(name);
            inner.by_conn.remove(&stale_id);
            debug!(user = %name, connection = %stale_id, "Reclaimed stale registry entry");
        }

        inner.by_name.insert(name.to_string(), conn.clone());
        inner.by_conn.insert(conn.id().clone(), name.to_string());
        debug!(user = %name, connection = %conn.id(), "Registered identity");

        Ok(inner.roster())
    }

    /// Remove the entry owned by `id`, if any. Idempotent.
    ///
    /// Returns the released name and the post-removal roster, or `None` if
    /// the connection never identified (or was already unregistered).
    pub fn unregister(&self, id: &ConnectionId) -> Option<(String, Roster)> {
        let mut inner = self.inner.write().unwrap();
        let name = inner.by_conn.remove(id)?;
        inner.by_name.remove(&name);
        debug!(user = %name, connection = %id, "Unregistered identity");
        let roster = inner.roster();
        Some((name, roster))
    }

    /// Point lookup for direct-message routing.
    ///
    /// A closed owner reads as a miss: no event may observe a name mapping
    /// to a dead connection.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<ConnectionHandle>> {
        let inner = self.inner.read().unwrap();
        inner
            .by_name
            .get(name)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// The display name held by a connection, if any.
    #[must_use]
    pub fn name_of(&self, id: &ConnectionId) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner.by_conn.get(id).cloned()
    }

    /// Fresh roster projection.
    #[must_use]
    pub fn snapshot(&self) -> Roster {
        self.inner.read().unwrap().roster()
    }

    /// Number of identified connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_name.len()
    }

    /// Check if no connection is identified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().by_name.is_empty()
    }
}
