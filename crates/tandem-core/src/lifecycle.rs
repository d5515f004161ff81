//! Connection lifecycle shared by sessions, fan-out and the gateway.
//!
//! Every path that tears a connection down goes through
//! [`ConnectionLifecycle::disconnect`], so a read error, a failed ping, a
//! failed fan-out write and an explicit `onLeaving` all race safely.
//!
//! Registry changes and the presence write that follows them run under a
//! per-user lock, so a late offline write can never land after a reconnect
//! marked the user online again.

use dashmap::DashMap;
use std::sync::Arc;
use tandem_transport::ConnectionHandle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model::UserId;
use crate::presence::OnlineService;
use crate::registry::Registry;

/// Binds connections on connect and tears them down exactly once.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    registry: Arc<Registry>,
    presence: OnlineService,
    locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl ConnectionLifecycle {
    #[must_use]
    pub fn new(registry: Arc<Registry>, presence: OnlineService) -> Self {
        Self {
            registry,
            presence,
            locks: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register an authenticated connection and mark the user online.
    ///
    /// A previous connection of the same user is closed (last writer wins).
    pub async fn connect(&self, user_id: &str, connection: ConnectionHandle) {
        let conn_id = connection.id().clone();
        let lock = self.lock_for(user_id);
        let guard = lock.lock().await;

        if let Some(displaced) = self.registry.bind(user_id, connection) {
            info!(
                user = %user_id,
                connection = %conn_id,
                displaced = %displaced.id(),
                "Replacing existing connection"
            );
            let _ = displaced.close().await;
        }

        if let Err(e) = self.presence.put(user_id, true).await {
            warn!(user = %user_id, error = %e, "Failed to mark user online");
        }

        drop(guard);
        drop(lock);
        self.release_lock(user_id);
    }

    /// Close the connection and drop it from the registry.
    ///
    /// Safe to call any number of times. Only the call that removes the
    /// user's current mapping marks the user offline, and returns the user.
    pub async fn disconnect(&self, connection: &ConnectionHandle) -> Option<UserId> {
        let _ = connection.close().await;

        let owner = self.registry.user_of(connection.id())?;
        let lock = self.lock_for(&owner);
        let guard = lock.lock().await;

        // A reconnect may have replaced the mapping while we waited
        let user_id = self.registry.unbind(connection.id());
        if let Some(user_id) = &user_id {
            debug!(user = %user_id, connection = %connection.id(), "Connection cleaned up");
            if let Err(e) = self.presence.put(user_id, false).await {
                warn!(user = %user_id, error = %e, "Failed to mark user offline");
            }
        }

        drop(guard);
        drop(lock);
        self.release_lock(&owner);
        user_id
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds it.
    fn release_lock(&self, user_id: &str) {
        self.locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
