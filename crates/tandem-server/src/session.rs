//! WebSocket sessions.
//!
//! One session per accepted socket: `Connecting -> Active -> Closing ->
//! Closed`. While active, a read loop decodes client frames into the shared
//! dispatch channel and a keepalive loop pings on a fixed period. Whatever
//! ends the session (read error, deadline, failed ping, panic) funnels into
//! the same idempotent cleanup.

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{FutureExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{ConnectionLifecycle, InboundAction, UserId};
use tandem_protocol::codec;
use tandem_transport::{ConnectionHandle, WebSocketConnection};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// State shared between a session's read loop and keepalive loop.
pub struct Session {
    state: AtomicU8,
    connection: ConnectionHandle,
    user_id: UserId,
    closing: Notify,
}

impl Session {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, connection: ConnectionHandle) -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
            connection,
            user_id: user_id.into(),
            closing: Notify::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn activate(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Connecting as u8,
            SessionState::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Ask the read loop to stop. Only the first call has an effect.
    pub fn begin_close(&self) {
        let was_active = self
            .state
            .compare_exchange(
                SessionState::Active as u8,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if was_active {
            self.closing.notify_one();
        }
    }

    /// Run cleanup and move to `Closed`. Later calls are no-ops.
    pub async fn finish(&self, lifecycle: &ConnectionLifecycle) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::SeqCst);
        if previous == SessionState::Closed as u8 {
            return;
        }

        let went_offline = lifecycle.disconnect(&self.connection).await.is_some();
        debug!(
            user = %self.user_id,
            connection = %self.connection.id(),
            went_offline,
            "Session closed"
        );
    }
}

/// Live session count, bounded by `max_connections`.
///
/// A slot is reserved before the upgrade and held until the session ends,
/// so concurrent upgrades cannot overshoot the limit.
pub struct ConnectionSlots {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionSlots {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve a slot. With `force` the limit is skipped, which lets a
    /// reconnecting user replace their own session at capacity.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, force: bool) -> Option<SlotGuard> {
        if force {
            self.active.fetch_add(1, Ordering::SeqCst);
        } else {
            self.active
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < self.max).then_some(n + 1)
                })
                .ok()?;
        }
        Some(SlotGuard(self.clone()))
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Releases its slot on drop.
pub struct SlotGuard(Arc<ConnectionSlots>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drive an authenticated socket until it closes.
pub async fn run(socket: WebSocket, user_id: UserId, remote: Option<SocketAddr>, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let connection: ConnectionHandle = Arc::new(WebSocketConnection::new(sink, remote));

    info!(user = %user_id, connection = %connection.id(), remote = ?remote, "WebSocket connected");
    drive(user_id, connection, stream, state).await;
}

/// Run a session over `connection` (write side) and `stream` (read side).
async fn drive<S>(user_id: UserId, connection: ConnectionHandle, stream: S, state: Arc<AppState>)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let _metrics_guard = ConnectionMetricsGuard::new();
    let session = Arc::new(Session::new(user_id, connection.clone()));

    state.lifecycle.connect(&session.user_id, connection).await;
    session.activate();

    let keepalive = tokio::spawn(keepalive(
        session.clone(),
        state.config.heartbeat.ping_interval(),
        state.config.heartbeat.write_timeout(),
    ));

    let outcome = AssertUnwindSafe(read_loop(&session, stream, &state))
        .catch_unwind()
        .await;
    if outcome.is_err() {
        error!(user = %session.user_id, connection = %session.connection.id(), "Read loop panicked");
        metrics::record_error("panic");
    }

    keepalive.abort();
    session.finish(&state.lifecycle).await;
}

async fn read_loop<S>(session: &Session, mut stream: S, state: &AppState)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let pong_timeout = state.config.heartbeat.pong_timeout();
    let max_size = state.config.limits.max_message_size;
    let conn_id = session.connection.id().clone();
    let mut deadline = Instant::now() + pong_timeout;

    loop {
        let next = tokio::select! {
            _ = session.closing.notified() => {
                debug!(connection = %conn_id, "Session closing");
                break;
            }
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!(connection = %conn_id, "Read deadline expired");
                break;
            }
            Ok(None) => {
                debug!(connection = %conn_id, "WebSocket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(connection = %conn_id, error = %e, "WebSocket read error");
                metrics::record_error("websocket");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        deadline = Instant::now() + pong_timeout;

        let decoded = match message {
            Message::Text(text) => {
                metrics::record_message(text.len(), "inbound");
                codec::decode_limited(&text, max_size)
            }
            Message::Binary(data) => {
                metrics::record_message(data.len(), "inbound");
                codec::decode_bytes(&data, max_size)
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!(connection = %conn_id, "Received close frame");
                break;
            }
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %conn_id, error = %e, "Rejected client frame");
                metrics::record_error("decode");
                break;
            }
        };

        let action = InboundAction {
            frame,
            connection: session.connection.clone(),
        };
        let started = std::time::Instant::now();
        if state.dispatch.send(action).await.is_err() {
            warn!(connection = %conn_id, "Gateway listener is gone");
            break;
        }
        metrics::record_dispatch_wait(started.elapsed().as_secs_f64());
    }
}

async fn keepalive(session: Arc<Session>, interval: Duration, write_timeout: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = session.connection.ping(write_timeout).await {
            debug!(connection = %session.connection.id(), error = %e, "Ping failed");
            session.begin_close();
            break;
        }
    }
}
