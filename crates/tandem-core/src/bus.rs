//! Event bus.
//!
//! Services `trigger` domain events; handlers `register` for event kinds.
//! Every (event, handler) pair becomes one job on a bounded queue served by a
//! fixed pool of workers. `trigger` never waits: when the queue is full the
//! job is dropped and counted. Handler errors and panics are counted and
//! logged, never reported back to the triggering service.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tandem_protocol::ProtocolError;
use tandem_transport::TransportError;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::events::{DomainEvent, EventKind};
use crate::repository::RepositoryError;

/// Errors a handler may return. They only end up in logs and counters.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Other(String),
}

/// Something that reacts to domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Number of worker tasks running handlers.
    pub workers: usize,
    /// Maximum queued handler invocations before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Event bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Handler invocations accepted onto the queue.
    pub queued: u64,
    /// Handler invocations that completed successfully.
    pub dispatched: u64,
    /// Handler invocations that returned an error or panicked.
    pub failed: u64,
    /// Handler invocations dropped because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

struct Job {
    event: Arc<DomainEvent>,
    handler: Arc<dyn EventHandler>,
}

struct Inner {
    handlers: DashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

/// Handle to the event bus. Clones share the same handlers and workers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create the bus and spawn its workers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: EventBusConfig) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker(id, rx.clone(), counters.clone())))
            .collect();

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            "Event bus started"
        );

        Self {
            inner: Arc::new(Inner {
                handlers: DashMap::new(),
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(handles),
                counters,
            }),
        }
    }

    /// Append a handler for an event kind. Handlers cannot be removed.
    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!(event = %kind, handler = handler.name(), "Registered event handler");
        self.inner.handlers.entry(kind).or_default().push(handler);
    }

    /// Number of handlers registered for an event kind.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner.handlers.get(&kind).map(|h| h.len()).unwrap_or(0)
    }

    /// Queue the event for every handler registered for its kind.
    ///
    /// Returns immediately with the number of handler invocations queued.
    pub fn trigger(&self, event: DomainEvent) -> usize {
        let kind = event.kind();
        let handlers = match self.inner.handlers.get(&kind) {
            Some(h) if !h.is_empty() => h.clone(),
            _ => {
                trace!(event = %kind, "No handlers registered");
                return 0;
            }
        };

        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            self.record_dropped(kind, handlers.len() as u64, "bus is shut down");
            return 0;
        };

        let event = Arc::new(event);
        let mut queued = 0;
        for handler in handlers {
            let job = Job {
                event: event.clone(),
                handler,
            };
            match sender.try_send(job) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => self.record_dropped(kind, 1, "queue full"),
                Err(TrySendError::Closed(_)) => self.record_dropped(kind, 1, "queue closed"),
            }
        }

        self.inner
            .counters
            .queued
            .fetch_add(queued as u64, Ordering::Relaxed);
        trace!(event = %kind, queued, "Triggered event");
        queued
    }

    fn record_dropped(&self, kind: EventKind, count: u64, reason: &'static str) {
        self.inner
            .counters
            .dropped
            .fetch_add(count, Ordering::Relaxed);
        warn!(event = %kind, count, reason, "Dropped event");
    }

    /// Snapshot of the bus counters.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        let c = &self.inner.counters;
        EventBusStats {
            queued: c.queued.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events and let workers drain what is already queued.
    ///
    /// Workers still busy after `grace` are aborted. Calling this twice is a
    /// no-op.
    pub async fn shutdown(&self, grace: Duration) {
        // Dropping the only sender closes the queue once it is drained.
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return;
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drained = tokio::time::timeout(grace, futures_util::future::join_all(handles)).await;

        match drained {
            Ok(_) => info!("Event bus drained"),
            Err(_) => {
                warn!(?grace, "Event bus did not drain in time, abandoning handlers");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

async fn worker(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<Counters>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let kind = job.event.kind();
        let outcome = AssertUnwindSafe(job.handler.handle(&job.event))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                counters.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(event = %kind, handler = job.handler.name(), error = %e, "Event handler failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(event = %kind, handler = job.handler.name(), "Event handler panicked");
            }
        }
    }

    debug!(worker = id, "Event bus worker stopped");
}
