//! Chat service.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::bus::EventBus;
use crate::events::{ChatCreated, ChatSeen, DomainEvent};
use crate::model::{Chat, Conversation};
use crate::repository::{ChatRepository, ConversationRepository, RepositoryError};

/// Chat service errors.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("User {user} is not a participant of conversation {conversation}")]
    NotParticipant { user: String, conversation: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Stores chats and announces them to both conversation parties.
#[derive(Clone)]
pub struct ChatService {
    chats: Arc<dyn ChatRepository>,
    conversations: Arc<dyn ConversationRepository>,
    bus: EventBus,
}

impl ChatService {
    #[must_use]
    pub fn new(
        chats: Arc<dyn ChatRepository>,
        conversations: Arc<dyn ConversationRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            chats,
            conversations,
            bus,
        }
    }

    async fn conversation_for(&self, conversation_id: &str, user_id: &str) -> Result<Conversation, ChatError> {
        let conversation = self
            .conversations
            .select_conversation_by_id(conversation_id)
            .await?;
        if !conversation.involves(user_id) {
            return Err(ChatError::NotParticipant {
                user: user_id.to_string(),
                conversation: conversation_id.to_string(),
            });
        }
        Ok(conversation)
    }

    /// Store a chat from `sender_id` and publish `ChatCreated`.
    pub async fn send_chat(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<Chat, ChatError> {
        let conversation = self.conversation_for(conversation_id, sender_id).await?;
        let chat = self
            .chats
            .insert_new_chat(Chat::new(conversation_id, sender_id, body))
            .await?;

        debug!(conversation = %conversation_id, chat = %chat.id, "Chat stored");
        self.bus.trigger(DomainEvent::ChatCreated(ChatCreated {
            chat: chat.clone(),
            request_from: conversation.request_from,
            request_to: conversation.request_to,
        }));
        Ok(chat)
    }

    /// Mark every unseen chat the other party sent as seen by `reader_id`.
    ///
    /// Publishes `ChatSeen` only when something changed. Returns the ids
    /// that were marked.
    pub async fn mark_seen(&self, conversation_id: &str, reader_id: &str) -> Result<Vec<String>, ChatError> {
        let conversation = self.conversation_for(conversation_id, reader_id).await?;
        let seen = self.chats.update_seen_chat(conversation_id, reader_id).await?;

        if !seen.is_empty() {
            debug!(conversation = %conversation_id, count = seen.len(), "Chats seen");
            self.bus.trigger(DomainEvent::ChatSeen(ChatSeen {
                conversation_id: conversation_id.to_string(),
                request_from: conversation.request_from,
                request_to: conversation.request_to,
                seen_chat_ids: seen.clone(),
            }));
        }
        Ok(seen)
    }

    /// Chats of a conversation, oldest first.
    pub async fn history(&self, conversation_id: &str, user_id: &str) -> Result<Vec<Chat>, ChatError> {
        self.conversation_for(conversation_id, user_id).await?;
        Ok(self.chats.select_chats_by_conversation(conversation_id).await?)
    }
}
