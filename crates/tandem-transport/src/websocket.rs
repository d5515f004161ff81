//! WebSocket connection implementation.
//!
//! Wraps the sink half of an axum [`WebSocket`]. The session that accepted
//! the socket keeps the stream half and drives the read loop itself.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, TransportError};

/// Upper bound for flushing the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The write side of an accepted WebSocket.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    remote_addr: Option<SocketAddr>,
    is_open: AtomicBool,
}

impl WebSocketConnection {
    /// Create a new WebSocket connection around a sink half.
    #[must_use]
    pub fn new(sink: SplitSink<WebSocket, Message>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::generate(),
            sink: Mutex::new(sink),
            remote_addr,
            is_open: AtomicBool::new(true),
        }
    }

    async fn send_message(&self, message: Message, deadline: Duration) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        // The deadline covers waiting for the sink lock as well as the write.
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };

        match timeout(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.is_open.store(false, Ordering::SeqCst);
                Err(TransportError::SendFailed(e.to_string()))
            }
            Err(_) => {
                warn!(connection = %self.id, "Write deadline exceeded");
                self.is_open.store(false, Ordering::SeqCst);
                Err(TransportError::Timeout(deadline))
            }
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send_text(&self, text: String, deadline: Duration) -> Result<(), TransportError> {
        self.send_message(Message::Text(text), deadline).await
    }

    async fn ping(&self, deadline: Duration) -> Result<(), TransportError> {
        self.send_message(Message::Ping(Vec::new()), deadline).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };

        match timeout(CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => {
                debug!(connection = %self.id, "WebSocket closed");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Other(format!("Failed to close: {}", e))),
            Err(_) => Err(TransportError::Timeout(CLOSE_TIMEOUT)),
        }
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}
