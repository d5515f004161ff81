//! In-process connection.
//!
//! Everything written to a [`MemoryConnection`] shows up on its paired
//! [`MemoryPeer`]. Writes can be made to fail on demand, which is how the
//! gateway's teardown paths are exercised without a real socket.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, TransportError};

/// A frame written to a memory connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Ping,
    Close,
}

/// Connection that delivers writes to an in-process peer.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
    is_open: AtomicBool,
    fail_writes: AtomicBool,
    close_calls: AtomicUsize,
}

/// Receiving end of a [`MemoryConnection`].
pub struct MemoryPeer {
    rx: mpsc::UnboundedReceiver<Outgoing>,
}

impl MemoryConnection {
    /// Create a connected pair with a generated id.
    #[must_use]
    pub fn pair() -> (Arc<Self>, MemoryPeer) {
        Self::pair_with_id(ConnectionId::generate())
    }

    /// Create a connected pair with a fixed id.
    #[must_use]
    pub fn pair_with_id(id: impl Into<ConnectionId>) -> (Arc<Self>, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id: id.into(),
            tx,
            is_open: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        (conn, MemoryPeer { rx })
    }

    /// Make every subsequent write fail as if the socket broke.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Number of times `close` has been called, including no-op calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn deliver(&self, frame: Outgoing) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            self.is_open.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send_text(&self, text: String, _deadline: Duration) -> Result<(), TransportError> {
        self.deliver(Outgoing::Text(text))
    }

    async fn ping(&self, _deadline: Duration) -> Result<(), TransportError> {
        self.deliver(Outgoing::Ping)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outgoing::Close);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

impl MemoryPeer {
    /// Wait for the next frame.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.rx.recv().await
    }

    /// Take the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.rx.try_recv().ok()
    }

    /// Drain all queued text frames.
    pub fn drain_text(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let Outgoing::Text(text) = frame {
                out.push(text);
            }
        }
        out
    }
}
