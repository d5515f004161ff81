//! Connection registry.
//!
//! Two maps form one logical bidirectional index: `connection -> user` and
//! `user -> connection`. Both live behind a single lock so every bind and
//! unbind updates the two directions atomically. The registry never closes
//! sockets; it is purely an index.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tandem_transport::{ConnectionHandle, ConnectionId};
use tracing::debug;

use crate::model::UserId;

#[derive(Default)]
struct Indexes {
    by_connection: HashMap<ConnectionId, UserId>,
    by_user: HashMap<UserId, ConnectionHandle>,
}

/// Bidirectional index of live connections.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Indexes>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a connection to a user in both directions.
    ///
    /// If the user already had a different live connection, its entries are
    /// removed first and it is returned so the caller can close it
    /// (last writer wins).
    pub fn bind(&self, user_id: &str, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut idx = self.write();
        let conn_id = connection.id().clone();

        // A connection belongs to at most one user.
        if let Some(previous_user) = idx.by_connection.remove(&conn_id) {
            if previous_user != user_id
                && idx
                    .by_user
                    .get(&previous_user)
                    .is_some_and(|c| c.id() == &conn_id)
            {
                idx.by_user.remove(&previous_user);
            }
        }

        let displaced = idx
            .by_user
            .insert(user_id.to_string(), connection)
            .filter(|old| old.id() != &conn_id);

        if let Some(old) = &displaced {
            idx.by_connection.remove(old.id());
        }
        idx.by_connection.insert(conn_id.clone(), user_id.to_string());

        debug!(
            user = %user_id,
            connection = %conn_id,
            displaced = displaced.is_some(),
            users = idx.by_user.len(),
            "Connection bound"
        );

        displaced
    }

    /// Remove a connection from both directions.
    ///
    /// The `user -> connection` entry is only removed while it still points
    /// at this connection. Returns the user id when this connection was the
    /// user's current one. Unbinding an unknown connection is a no-op.
    pub fn unbind(&self, connection_id: &ConnectionId) -> Option<UserId> {
        let mut idx = self.write();
        let user_id = idx.by_connection.remove(connection_id)?;

        let is_current = idx
            .by_user
            .get(&user_id)
            .is_some_and(|c| c.id() == connection_id);

        if is_current {
            idx.by_user.remove(&user_id);
            debug!(user = %user_id, connection = %connection_id, "Connection unbound");
            Some(user_id)
        } else {
            None
        }
    }

    /// Look up the user bound to a connection.
    #[must_use]
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.read().by_connection.get(connection_id).cloned()
    }

    /// Look up a user's live connection.
    #[must_use]
    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.read().by_user.get(user_id).cloned()
    }

    /// Check whether a user has a live connection.
    #[must_use]
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.read().by_user.contains_key(user_id)
    }

    /// Number of users with a live connection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_user.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that the two directions agree entry for entry.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let idx = self.read();
        idx.by_connection.len() == idx.by_user.len()
            && idx.by_user.iter().all(|(user, conn)| {
                idx.by_connection.get(conn.id()).is_some_and(|u| u == user)
            })
    }
}
