//! Domain events produced by the services and fanned out to sockets.
//!
//! Each event knows who should receive it and how it looks on the wire.

use serde_json::json;
use std::fmt;
use tandem_protocol::frames::events as actions;
use tandem_protocol::OutboundFrame;

use crate::model::{Chat, Match, MatchStatus, OnlineRecord, Profile, UserId};

/// Event names handlers register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChatCreated,
    ChatSeen,
    MatchRevealed,
    MatchRequestChanged,
    ProfileUpdated,
    PresenceChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ChatCreated,
        EventKind::ChatSeen,
        EventKind::MatchRevealed,
        EventKind::MatchRequestChanged,
        EventKind::ProfileUpdated,
        EventKind::PresenceChanged,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChatCreated => "ChatCreated",
            EventKind::ChatSeen => "ChatSeen",
            EventKind::MatchRevealed => "MatchRevealed",
            EventKind::MatchRequestChanged => "MatchRequestChanged",
            EventKind::ProfileUpdated => "ProfileUpdated",
            EventKind::PresenceChanged => "PresenceChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message was stored.
#[derive(Debug, Clone)]
pub struct ChatCreated {
    pub chat: Chat,
    pub request_from: UserId,
    pub request_to: UserId,
}

/// Chats in a conversation were marked as seen.
#[derive(Debug, Clone)]
pub struct ChatSeen {
    pub conversation_id: String,
    pub request_from: UserId,
    pub request_to: UserId,
    pub seen_chat_ids: Vec<String>,
}

/// The reveal dimension of a match changed.
#[derive(Debug, Clone)]
pub struct MatchRevealed {
    pub match_id: String,
    /// New reveal status.
    pub match_status: MatchStatus,
    pub record: Match,
}

/// The request dimension of a match changed.
#[derive(Debug, Clone)]
pub struct MatchRequestChanged {
    pub record: Match,
}

/// A user's profile changed.
#[derive(Debug, Clone)]
pub struct ProfileUpdated {
    pub profile: Profile,
    pub recipients: Vec<UserId>,
}

/// A user went online or offline.
#[derive(Debug, Clone)]
pub struct PresenceChanged {
    pub presence: OnlineRecord,
    pub recipients: Vec<UserId>,
}

/// A named event with its payload.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ChatCreated(ChatCreated),
    ChatSeen(ChatSeen),
    MatchRevealed(MatchRevealed),
    MatchRequestChanged(MatchRequestChanged),
    ProfileUpdated(ProfileUpdated),
    PresenceChanged(PresenceChanged),
}

impl DomainEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ChatCreated(_) => EventKind::ChatCreated,
            DomainEvent::ChatSeen(_) => EventKind::ChatSeen,
            DomainEvent::MatchRevealed(_) => EventKind::MatchRevealed,
            DomainEvent::MatchRequestChanged(_) => EventKind::MatchRequestChanged,
            DomainEvent::ProfileUpdated(_) => EventKind::ProfileUpdated,
            DomainEvent::PresenceChanged(_) => EventKind::PresenceChanged,
        }
    }

    /// Users that should receive this event, without duplicates.
    #[must_use]
    pub fn recipients(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = match self {
            DomainEvent::ChatCreated(e) => vec![e.request_from.clone(), e.request_to.clone()],
            DomainEvent::ChatSeen(e) => vec![e.request_from.clone(), e.request_to.clone()],
            DomainEvent::MatchRevealed(e) => e.record.participants().map(String::from).to_vec(),
            DomainEvent::MatchRequestChanged(e) => {
                e.record.participants().map(String::from).to_vec()
            }
            DomainEvent::ProfileUpdated(e) => e.recipients.clone(),
            DomainEvent::PresenceChanged(e) => e.recipients.clone(),
        };
        let mut seen = std::collections::HashSet::with_capacity(users.len());
        users.retain(|u| seen.insert(u.clone()));
        users
    }

    /// Outbound `{action, data}` frame for this event.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be represented as JSON.
    pub fn to_frame(&self) -> Result<OutboundFrame, serde_json::Error> {
        match self {
            DomainEvent::ChatCreated(e) => OutboundFrame::wrapped(actions::CHAT_CREATED, "chat", &e.chat),
            DomainEvent::ChatSeen(e) => Ok(OutboundFrame::new(
                actions::CHAT_SEEN,
                json!({
                    "convId": e.conversation_id,
                    "seenChatIds": e.seen_chat_ids,
                }),
            )),
            DomainEvent::MatchRevealed(e) => {
                OutboundFrame::wrapped(actions::MATCH_REVEALED, "match", &e.record)
            }
            DomainEvent::MatchRequestChanged(e) => {
                OutboundFrame::wrapped(actions::MATCH_REQUEST_CHANGED, "match", &e.record)
            }
            DomainEvent::ProfileUpdated(e) => {
                OutboundFrame::wrapped(actions::PROFILE_UPDATED, "profile", &e.profile)
            }
            DomainEvent::PresenceChanged(e) => {
                OutboundFrame::wrapped(actions::PRESENCE_CHANGED, "presence", &e.presence)
            }
        }
    }
}
