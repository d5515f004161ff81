//! Codec for encoding and decoding Tandem frames.
//!
//! Frames are plain JSON text, one frame per WebSocket message.

use thiserror::Error;

use crate::frames::{InboundFrame, OutboundFrame};

/// Default maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame exceeds the size limit it was decoded against.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame is not valid UTF-8.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound frame to JSON text.
///
/// Outbound frames carry server-built events and are not size limited.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode(frame: &OutboundFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode an inbound frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, is not JSON, or names an
/// unknown action.
pub fn decode(text: &str) -> Result<InboundFrame, ProtocolError> {
    decode_limited(text, MAX_FRAME_SIZE)
}

/// Decode an inbound frame, rejecting anything above `max_size` bytes.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_limited(text: &str, max_size: usize) -> Result<InboundFrame, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: max_size,
        });
    }

    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound frame delivered as a binary message.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or fail [`decode_limited`].
pub fn decode_bytes(data: &[u8], max_size: usize) -> Result<InboundFrame, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_limited(text, max_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Action;

    #[test]
    fn test_decode_relay_action() {
        let frame = decode(r#"{"action":"onTypingStart","payload":"conv-42"}"#).unwrap();
        assert_eq!(frame.action, Action::TypingStart);
        assert_eq!(frame.payload, "conv-42");
    }

    #[test]
    fn test_decode_missing_payload_defaults_empty() {
        let frame = decode(r#"{"action":"onLeaving"}"#).unwrap();
        assert_eq!(frame.action, Action::Leaving);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_decode_unknown_action() {
        match decode(r#"{"action":"onDancing","payload":"x"}"#) {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let payload = "x".repeat(MAX_FRAME_SIZE);
        let text = format!(r#"{{"action":"onTypingStart","payload":"{}"}}"#, payload);

        match decode(&text) {
            Err(ProtocolError::FrameTooLarge { max, .. }) => assert_eq!(max, MAX_FRAME_SIZE),
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large_reports_configured_limit() {
        let text = r#"{"action":"onTypingStart","payload":"conv-42"}"#;
        let err = decode_limited(text, 16).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Frame size {} exceeds maximum 16", text.len())
        );

        match decode_bytes(text.as_bytes(), 8) {
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                assert_eq!(size, text.len());
                assert_eq!(max, 8);
            }
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_has_no_size_limit() {
        let ids: Vec<String> = (0..2_000).map(|i| format!("{:064}", i)).collect();
        let frame = OutboundFrame::new("onChatSeen", serde_json::json!({ "seenChatIds": ids }));
        let text = encode(&frame).unwrap();
        assert!(text.len() > MAX_FRAME_SIZE);
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        match decode_bytes(&[0xff, 0xfe, 0xfd], MAX_FRAME_SIZE) {
            Err(ProtocolError::InvalidUtf8) => {}
            other => panic!("Expected InvalidUtf8 error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_relay() {
        let text = encode(&OutboundFrame::relay(Action::TypingStop, "c1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["action"], "onTypingStop");
        assert_eq!(value["data"]["convId"], "c1");
    }
}
