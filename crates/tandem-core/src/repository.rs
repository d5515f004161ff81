//! Persistence collaborator interfaces.
//!
//! The gateway never talks to a database directly. Services depend on these
//! traits; [`crate::memory::MemoryStore`] implements all of them in memory.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Chat, Conversation, Match, OnlineRecord, Profile, UserId};

/// Repository errors. Services pass these through unchanged.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No record with the given id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The write conflicts with an existing record.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn insert_match(&self, record: Match) -> RepositoryResult<Match>;

    async fn get_match_by_id(&self, match_id: &str) -> RepositoryResult<Match>;

    /// Replace the stored match. Fails with `NotFound` if it does not exist.
    async fn update_match_by_id(&self, match_id: &str, record: Match) -> RepositoryResult<Match>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn insert_new_chat(&self, chat: Chat) -> RepositoryResult<Chat>;

    /// Mark every unseen chat in the conversation that was not sent by
    /// `reader` as seen. Returns the ids that changed.
    async fn update_seen_chat(
        &self,
        conversation_id: &str,
        reader: &str,
    ) -> RepositoryResult<Vec<String>>;

    /// Chats of a conversation, oldest first.
    async fn select_chats_by_conversation(
        &self,
        conversation_id: &str,
    ) -> RepositoryResult<Vec<Chat>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn insert_conversation(&self, conversation: Conversation)
        -> RepositoryResult<Conversation>;

    async fn select_conversation_by_id(
        &self,
        conversation_id: &str,
    ) -> RepositoryResult<Conversation>;

    async fn select_conversations_by_user_id(
        &self,
        user_id: &str,
    ) -> RepositoryResult<Vec<Conversation>>;
}

#[async_trait]
pub trait OnlineRepository: Send + Sync {
    /// Insert an offline record for the user. Returns the existing record
    /// untouched if there already is one.
    async fn insert(&self, user_id: &str) -> RepositoryResult<OnlineRecord>;

    async fn select(&self, user_id: &str) -> RepositoryResult<OnlineRecord>;

    async fn update(&self, record: OnlineRecord) -> RepositoryResult<OnlineRecord>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn upsert_profile(&self, profile: Profile) -> RepositoryResult<Profile>;

    async fn select_profile(&self, user_id: &str) -> RepositoryResult<Profile>;
}

/// Other participants of every conversation `user_id` takes part in,
/// without duplicates.
pub async fn counterparts_of(
    conversations: &dyn ConversationRepository,
    user_id: &str,
) -> RepositoryResult<Vec<UserId>> {
    let mut users: Vec<UserId> = Vec::new();
    for conversation in conversations.select_conversations_by_user_id(user_id).await? {
        if let Some(other) = conversation.other_party(user_id) {
            if !users.iter().any(|u| u == other) {
                users.push(other.to_string());
            }
        }
    }
    Ok(users)
}
