//! # tandem-protocol
//!
//! Wire protocol definitions for the Tandem realtime gateway.
//!
//! Every WebSocket message is a single JSON object:
//!
//! - Inbound (client to server): `{"action": "...", "payload": "..."}`
//! - Outbound (server to client): `{"action": "...", "data": {...}}`
//!
//! ## Example
//!
//! ```rust
//! use tandem_protocol::{codec, Action, OutboundFrame};
//!
//! let inbound = codec::decode(r#"{"action":"onTypingStart","payload":"conv-1"}"#).unwrap();
//! assert_eq!(inbound.action, Action::TypingStart);
//!
//! let frame = OutboundFrame::relay(inbound.action, &inbound.payload);
//! let text = codec::encode(&frame).unwrap();
//! assert!(text.contains("convId"));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{Action, InboundFrame, OutboundFrame};
