//! In-memory implementation of every repository trait.
//!
//! Backs the default server wiring and the tests. Not durable.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Chat, Conversation, Match, OnlineRecord, Profile};
use crate::repository::{
    ChatRepository, ConversationRepository, MatchRepository, OnlineRepository, ProfileRepository,
    RepositoryError, RepositoryResult,
};

/// DashMap-backed store for matches, conversations, chats, presence and profiles.
#[derive(Debug, Default)]
pub struct MemoryStore {
    matches: DashMap<String, Match>,
    conversations: DashMap<String, Conversation>,
    /// Conversation id -> chats, oldest first.
    chats: DashMap<String, Vec<Chat>>,
    online: DashMap<String, OnlineRecord>,
    profiles: DashMap<String, Profile>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchRepository for MemoryStore {
    async fn insert_match(&self, record: Match) -> RepositoryResult<Match> {
        if self.matches.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "match {} already exists",
                record.id
            )));
        }
        self.matches.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_match_by_id(&self, match_id: &str) -> RepositoryResult<Match> {
        self.matches
            .get(match_id)
            .map(|m| m.clone())
            .ok_or_else(|| RepositoryError::not_found("match", match_id))
    }

    async fn update_match_by_id(&self, match_id: &str, record: Match) -> RepositoryResult<Match> {
        match self.matches.get_mut(match_id) {
            Some(mut entry) => {
                *entry = record.clone();
                Ok(record)
            }
            None => Err(RepositoryError::not_found("match", match_id)),
        }
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn insert_new_chat(&self, chat: Chat) -> RepositoryResult<Chat> {
        self.chats
            .entry(chat.conversation_id.clone())
            .or_default()
            .push(chat.clone());
        Ok(chat)
    }

    async fn update_seen_chat(
        &self,
        conversation_id: &str,
        reader: &str,
    ) -> RepositoryResult<Vec<String>> {
        let mut seen = Vec::new();
        if let Some(mut chats) = self.chats.get_mut(conversation_id) {
            for chat in chats.iter_mut().filter(|c| !c.seen && c.sender_id != reader) {
                chat.seen = true;
                seen.push(chat.id.clone());
            }
        }
        Ok(seen)
    }

    async fn select_chats_by_conversation(
        &self,
        conversation_id: &str,
    ) -> RepositoryResult<Vec<Chat>> {
        Ok(self
            .chats
            .get(conversation_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn insert_conversation(
        &self,
        conversation: Conversation,
    ) -> RepositoryResult<Conversation> {
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn select_conversation_by_id(
        &self,
        conversation_id: &str,
    ) -> RepositoryResult<Conversation> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.clone())
            .ok_or_else(|| RepositoryError::not_found("conversation", conversation_id))
    }

    async fn select_conversations_by_user_id(
        &self,
        user_id: &str,
    ) -> RepositoryResult<Vec<Conversation>> {
        let mut found: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.involves(user_id))
            .map(|c| c.value().clone())
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }
}

#[async_trait]
impl OnlineRepository for MemoryStore {
    async fn insert(&self, user_id: &str) -> RepositoryResult<OnlineRecord> {
        Ok(self
            .online
            .entry(user_id.to_string())
            .or_insert_with(|| OnlineRecord::offline(user_id))
            .clone())
    }

    async fn select(&self, user_id: &str) -> RepositoryResult<OnlineRecord> {
        self.online
            .get(user_id)
            .map(|r| r.clone())
            .ok_or_else(|| RepositoryError::not_found("online record", user_id))
    }

    async fn update(&self, record: OnlineRecord) -> RepositoryResult<OnlineRecord> {
        match self.online.get_mut(&record.user_id) {
            Some(mut entry) => {
                *entry = record.clone();
                Ok(record)
            }
            None => Err(RepositoryError::not_found("online record", record.user_id)),
        }
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn upsert_profile(&self, profile: Profile) -> RepositoryResult<Profile> {
        self.profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(profile)
    }

    async fn select_profile(&self, user_id: &str) -> RepositoryResult<Profile> {
        self.profiles
            .get(user_id)
            .map(|p| p.clone())
            .ok_or_else(|| RepositoryError::not_found("profile", user_id))
    }
}
