//! Presence tracking.
//!
//! One online/offline record per user, driven by session lifecycle rather
//! than polling. `last_online` records when the user was last online, so it
//! is only stamped on the transition to offline.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::events::{DomainEvent, PresenceChanged};
use crate::model::{now_millis, OnlineRecord};
use crate::repository::{
    counterparts_of, ConversationRepository, OnlineRepository, RepositoryResult,
};

/// Online/offline records of users.
#[derive(Clone)]
pub struct OnlineService {
    repository: Arc<dyn OnlineRepository>,
    conversations: Arc<dyn ConversationRepository>,
    bus: EventBus,
}

impl OnlineService {
    #[must_use]
    pub fn new(
        repository: Arc<dyn OnlineRepository>,
        conversations: Arc<dyn ConversationRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            repository,
            conversations,
            bus,
        }
    }

    /// Insert an offline record for the user. An existing record is
    /// returned unchanged.
    pub async fn create(&self, user_id: &str) -> RepositoryResult<OnlineRecord> {
        self.repository.insert(user_id).await
    }

    pub async fn get(&self, user_id: &str) -> RepositoryResult<OnlineRecord> {
        self.repository.select(user_id).await
    }

    /// Set the online flag, creating the record first if needed.
    ///
    /// Publishes `PresenceChanged` to the user's conversation counterparts.
    pub async fn put(&self, user_id: &str, is_online: bool) -> RepositoryResult<OnlineRecord> {
        let mut record = match self.repository.select(user_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => self.repository.insert(user_id).await?,
            Err(e) => return Err(e),
        };

        if record.is_online && !is_online {
            record.last_online = now_millis();
        }
        record.is_online = is_online;

        let record = self.repository.update(record).await?;
        debug!(user = %user_id, online = is_online, "Presence updated");

        let recipients = match counterparts_of(self.conversations.as_ref(), user_id).await {
            Ok(users) => users,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Could not resolve presence recipients");
                Vec::new()
            }
        };

        self.bus.trigger(DomainEvent::PresenceChanged(PresenceChanged {
            presence: record.clone(),
            recipients,
        }));

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusConfig;
    use crate::memory::MemoryStore;
    use crate::model::{Conversation, Match};

    fn service(store: Arc<MemoryStore>) -> OnlineService {
        OnlineService::new(
            store.clone(),
            store,
            EventBus::start(EventBusConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_presence_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let online = service(store);

        let created = online.create("alice").await.unwrap();
        assert!(!created.is_online);
        assert!(!online.get("alice").await.unwrap().is_online);

        online.put("alice", true).await.unwrap();
        assert!(online.get("alice").await.unwrap().is_online);

        let before = now_millis();
        online.put("alice", false).await.unwrap();
        let record = online.get("alice").await.unwrap();
        assert!(!record.is_online);
        assert!(record.last_online >= before);
    }

    #[tokio::test]
    async fn test_going_online_keeps_last_online() {
        let store = Arc::new(MemoryStore::new());
        let online = service(store);

        let created = online.create("alice").await.unwrap();
        let record = online.put("alice", true).await.unwrap();
        assert_eq!(record.last_online, created.last_online);
    }

    #[tokio::test]
    async fn test_put_without_record_creates_it() {
        let store = Arc::new(MemoryStore::new());
        let online = service(store);

        assert!(online.get("bob").await.unwrap_err().is_not_found());
        let record = online.put("bob", true).await.unwrap();
        assert!(record.is_online);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let online = service(store);

        online.put("alice", true).await.unwrap();
        let again = online.create("alice").await.unwrap();
        assert!(again.is_online);
    }

    #[tokio::test]
    async fn test_put_publishes_to_counterparts() {
        use crate::bus::{EventHandler, HandlerError};
        use crate::events::EventKind;
        use async_trait::async_trait;
        use tokio::sync::mpsc;

        struct Capture(mpsc::UnboundedSender<Vec<String>>);

        #[async_trait]
        impl EventHandler for Capture {
            async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
                let _ = self.0.send(event.recipients());
                Ok(())
            }
        }

        let store = Arc::new(MemoryStore::new());
        let m = Match::new("alice", "bob");
        store
            .insert_conversation(Conversation::for_match(&m))
            .await
            .unwrap();

        let online = service(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        online
            .bus
            .register(EventKind::PresenceChanged, Arc::new(Capture(tx)));

        online.put("alice", true).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec!["bob".to_string()]);
    }
}
