//! Profile service.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::events::{DomainEvent, ProfileUpdated};
use crate::model::{now_millis, Profile};
use crate::repository::{counterparts_of, ConversationRepository, ProfileRepository, RepositoryResult};

/// Stores profiles and tells conversation counterparts about changes.
#[derive(Clone)]
pub struct ProfileService {
    profiles: Arc<dyn ProfileRepository>,
    conversations: Arc<dyn ConversationRepository>,
    bus: EventBus,
}

impl ProfileService {
    #[must_use]
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        conversations: Arc<dyn ConversationRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            profiles,
            conversations,
            bus,
        }
    }

    pub async fn get_profile(&self, user_id: &str) -> RepositoryResult<Profile> {
        self.profiles.select_profile(user_id).await
    }

    /// Store the profile and publish `ProfileUpdated`.
    pub async fn update_profile(&self, mut profile: Profile) -> RepositoryResult<Profile> {
        profile.updated_at = now_millis();
        let profile = self.profiles.upsert_profile(profile).await?;

        let recipients = match counterparts_of(self.conversations.as_ref(), &profile.user_id).await {
            Ok(users) => users,
            Err(e) => {
                warn!(user = %profile.user_id, error = %e, "Could not resolve profile recipients");
                Vec::new()
            }
        };

        debug!(user = %profile.user_id, recipients = recipients.len(), "Profile updated");
        self.bus.trigger(DomainEvent::ProfileUpdated(ProfileUpdated {
            profile: profile.clone(),
            recipients,
        }));
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBusConfig, EventHandler, HandlerError};
    use crate::events::EventKind;
    use crate::memory::MemoryStore;
    use crate::model::{Conversation, Match};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct Recipients(mpsc::UnboundedSender<Vec<String>>);

    #[async_trait]
    impl EventHandler for Recipients {
        async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
            let _ = self.0.send(event.recipients());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_reaches_every_counterpart() {
        let store = Arc::new(MemoryStore::new());
        for other in ["bob", "carol"] {
            store
                .insert_conversation(Conversation::for_match(&Match::new("alice", other)))
                .await
                .unwrap();
        }

        let bus = EventBus::start(EventBusConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register(EventKind::ProfileUpdated, Arc::new(Recipients(tx)));
        let profiles = ProfileService::new(store.clone(), store, bus);

        let stored = profiles
            .update_profile(Profile {
                user_id: "alice".into(),
                display_name: "Alice".into(),
                bio: "hi".into(),
                updated_at: 0,
            })
            .await
            .unwrap();
        assert!(stored.updated_at > 0);
        assert_eq!(profiles.get_profile("alice").await.unwrap(), stored);

        let mut recipients = rx.recv().await.unwrap();
        recipients.sort();
        assert_eq!(recipients, vec!["bob".to_string(), "carol".to_string()]);
    }
}
