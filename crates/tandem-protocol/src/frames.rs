//! Frame types for the Tandem protocol.
//!
//! Inbound frames carry a client action from a closed set. Outbound frames
//! carry a server action name plus an event-specific JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Outbound action names for server-originated events.
pub mod events {
    pub const CHAT_CREATED: &str = "onChatCreated";
    pub const CHAT_SEEN: &str = "onChatSeen";
    pub const MATCH_REVEALED: &str = "onMatchRevealed";
    pub const MATCH_REQUEST_CHANGED: &str = "onMatchRequestChanged";
    pub const PROFILE_UPDATED: &str = "onProfileUpdated";
    pub const PRESENCE_CHANGED: &str = "onPresenceChanged";
}

/// Client actions accepted on the socket.
///
/// Anything outside this set fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "onTypingStart")]
    TypingStart,
    #[serde(rename = "onTypingStop")]
    TypingStop,
    #[serde(rename = "onSendingVoiceStart")]
    SendingVoiceStart,
    #[serde(rename = "onSendingVoiceStop")]
    SendingVoiceStop,
    #[serde(rename = "onChoosingStickerStart")]
    ChoosingStickerStart,
    #[serde(rename = "onChoosingStickerStop")]
    ChoosingStickerStop,
    #[serde(rename = "onLeaving")]
    Leaving,
}

impl Action {
    /// All actions, in wire order.
    pub const ALL: [Action; 7] = [
        Action::TypingStart,
        Action::TypingStop,
        Action::SendingVoiceStart,
        Action::SendingVoiceStop,
        Action::ChoosingStickerStart,
        Action::ChoosingStickerStop,
        Action::Leaving,
    ];

    /// Wire name of the action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::TypingStart => "onTypingStart",
            Action::TypingStop => "onTypingStop",
            Action::SendingVoiceStart => "onSendingVoiceStart",
            Action::SendingVoiceStop => "onSendingVoiceStop",
            Action::ChoosingStickerStart => "onChoosingStickerStart",
            Action::ChoosingStickerStop => "onChoosingStickerStop",
            Action::Leaving => "onLeaving",
        }
    }

    /// Whether the action is forwarded to the other conversation participant.
    #[must_use]
    pub fn is_relay(&self) -> bool {
        !matches!(self, Action::Leaving)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Requested action.
    pub action: Action,
    /// Conversation id for relay actions; empty otherwise.
    #[serde(default)]
    pub payload: String,
}

impl InboundFrame {
    /// Create a new inbound frame.
    #[must_use]
    pub fn new(action: Action, payload: impl Into<String>) -> Self {
        Self {
            action,
            payload: payload.into(),
        }
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Action name the client dispatches on.
    pub action: String,
    /// Event-specific body.
    pub data: Value,
}

impl OutboundFrame {
    /// Create a frame from an action name and a ready JSON body.
    #[must_use]
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Create a frame relaying a client action for a conversation.
    #[must_use]
    pub fn relay(action: Action, conversation_id: &str) -> Self {
        Self::new(action.as_str(), json!({ "convId": conversation_id }))
    }

    /// Create a frame whose body wraps `value` under a single key,
    /// e.g. `{"match": {...}}`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn wrapped<T: Serialize>(
        action: impl Into<String>,
        key: &str,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut body = serde_json::Map::with_capacity(1);
        body.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(Self::new(action, Value::Object(body)))
    }
}
