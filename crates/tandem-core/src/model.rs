//! Records exchanged between the services, repositories and the wire.
//!
//! All timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A user identifier, as issued by the auth collaborator.
pub type UserId = String;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a unique, prefixed record id.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{:x}{:04x}", prefix, timestamp, counter & 0xffff)
}

/// Status shared by both match dimensions (request and reveal).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Unknown,
    Requested,
    Declined,
    Accepted,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 4] = [
        MatchStatus::Unknown,
        MatchStatus::Requested,
        MatchStatus::Declined,
        MatchStatus::Accepted,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Unknown => "unknown",
            MatchStatus::Requested => "requested",
            MatchStatus::Declined => "declined",
            MatchStatus::Accepted => "accepted",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-to-one relationship proposal between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub request_from: UserId,
    pub request_to: UserId,
    pub request_status: MatchStatus,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<u64>,
    pub reveal_status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<u64>,
}

impl Match {
    /// A fresh match with both dimensions at `unknown`.
    #[must_use]
    pub fn new(request_from: impl Into<UserId>, request_to: impl Into<UserId>) -> Self {
        Self {
            id: generate_id("match"),
            request_from: request_from.into(),
            request_to: request_to.into(),
            request_status: MatchStatus::Unknown,
            created_at: now_millis(),
            accepted_at: None,
            reveal_status: MatchStatus::Unknown,
            revealed_at: None,
        }
    }

    /// Both parties, requester first.
    #[must_use]
    pub fn participants(&self) -> [&str; 2] {
        [&self.request_from, &self.request_to]
    }
}

/// A chat thread between the two parties of an accepted match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub match_id: String,
    pub request_from: UserId,
    pub request_to: UserId,
    pub created_at: u64,
}

impl Conversation {
    /// Open a conversation for an accepted match.
    #[must_use]
    pub fn for_match(record: &Match) -> Self {
        Self {
            id: generate_id("conv"),
            match_id: record.id.clone(),
            request_from: record.request_from.clone(),
            request_to: record.request_to.clone(),
            created_at: now_millis(),
        }
    }

    #[must_use]
    pub fn involves(&self, user_id: &str) -> bool {
        self.request_from == user_id || self.request_to == user_id
    }

    /// The participant that is not `user_id`, or `None` if `user_id` is not
    /// part of this conversation.
    #[must_use]
    pub fn other_party(&self, user_id: &str) -> Option<&str> {
        if self.request_from == user_id {
            Some(&self.request_to)
        } else if self.request_to == user_id {
            Some(&self.request_from)
        } else {
            None
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: u64,
    pub seen: bool,
}

impl Chat {
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        sender_id: impl Into<UserId>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id("chat"),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            body: body.into(),
            created_at: now_millis(),
            seen: false,
        }
    }
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub updated_at: u64,
}

/// Online/offline record of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineRecord {
    pub user_id: UserId,
    /// Last time the user was seen going offline.
    pub last_online: u64,
    pub is_online: bool,
}

impl OnlineRecord {
    /// A new record, defaulted to offline.
    #[must_use]
    pub fn offline(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            last_online: now_millis(),
            is_online: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id("chat");
        let b = generate_id("chat");
        assert_ne!(a, b);
        assert!(a.starts_with("chat_"));
    }

    #[test]
    fn test_match_serializes_camel_case() {
        let record = Match::new("alice", "bob");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["requestFrom"], "alice");
        assert_eq!(value["requestStatus"], "unknown");
        assert!(value.get("acceptedAt").is_none());
    }

    #[test]
    fn test_conversation_other_party() {
        let record = Match::new("alice", "bob");
        let conv = Conversation::for_match(&record);
        assert_eq!(conv.other_party("alice"), Some("bob"));
        assert_eq!(conv.other_party("bob"), Some("alice"));
        assert_eq!(conv.other_party("carol"), None);
    }
}
