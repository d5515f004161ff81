//! Transport abstraction traits for Tandem.
//!
//! These traits define the interface every connection implementation must
//! provide, so the gateway core never depends on a concrete socket type.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tandem_protocol::{codec, OutboundFrame};
use thiserror::Error;

/// Counter mixed into generated ids so ids minted in the same nanosecond differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
///
/// All of these are terminal for the connection that produced them.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A write did not complete before its deadline.
    #[error("Write deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tandem_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The write side of a live client socket.
///
/// Implementations must make [`Connection::close`] idempotent and must be
/// safe to write from several tasks at once.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Send a text frame, failing if it is not written within `deadline`.
    async fn send_text(&self, text: String, deadline: Duration) -> Result<(), TransportError>;

    /// Send a ping control frame, failing if it is not written within `deadline`.
    async fn ping(&self, deadline: Duration) -> Result<(), TransportError>;

    /// Close the connection. Closing an already closed connection is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Encode and send an outbound frame.
    async fn send_frame(
        &self,
        frame: &OutboundFrame,
        deadline: Duration,
    ) -> Result<(), TransportError> {
        let text = codec::encode(frame)?;
        self.send_text(text, deadline).await
    }
}

/// Shared handle to a connection.
pub type ConnectionHandle = Arc<dyn Connection>;
