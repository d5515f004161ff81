//! # tandem-transport
//!
//! Connection abstraction for the Tandem gateway.
//!
//! A [`Connection`] is the write side of a live client socket. The session
//! that accepted the socket owns the read side; everything else (registry,
//! fan-out, gateway listener) only holds a shared [`ConnectionHandle`] and
//! writes through it with a deadline.
//!
//! - **WebSocket** - axum WebSocket sink (feature `websocket`)
//! - **Memory** - in-process connection, used by tests and tools
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tandem_transport::ConnectionHandle;
//!
//! async fn notify(conn: ConnectionHandle, text: String) {
//!     if conn.send_text(text, Duration::from_secs(10)).await.is_err() {
//!         // connection is gone; run cleanup
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer, Outgoing};
pub use traits::{Connection, ConnectionHandle, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
