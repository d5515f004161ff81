//! Event fan-out.
//!
//! Turns domain events into `{action, data}` frames on the recipients' live
//! sockets. Recipients without a socket are skipped; nothing is queued or
//! retried.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::codec;
use tracing::{debug, trace, warn};

use crate::bus::{EventBus, EventHandler, HandlerError};
use crate::events::{DomainEvent, EventKind};
use crate::lifecycle::ConnectionLifecycle;
use crate::registry::Registry;

/// Delivers domain events to connected users.
pub struct FanoutDispatcher {
    registry: Arc<Registry>,
    lifecycle: ConnectionLifecycle,
    write_timeout: Duration,
}

impl FanoutDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        lifecycle: ConnectionLifecycle,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            write_timeout,
        }
    }

    /// Register this dispatcher for every event kind.
    pub fn register_all(self: Arc<Self>, bus: &EventBus) {
        for kind in EventKind::ALL {
            bus.register(kind, self.clone());
        }
    }

    /// Write the event to every recipient with a live socket.
    ///
    /// Returns the number of successful writes. A failed write tears the
    /// recipient's connection down.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded.
    pub async fn deliver(&self, event: &DomainEvent) -> Result<usize, HandlerError> {
        let recipients = event.recipients();
        if recipients.is_empty() {
            trace!(event = %event.kind(), "No recipients");
            return Ok(0);
        }

        let text = codec::encode(&event.to_frame()?)?;
        let mut delivered = 0;

        for user_id in &recipients {
            let Some(connection) = self.registry.connection_of(user_id) else {
                trace!(event = %event.kind(), user = %user_id, "Recipient offline, skipping");
                continue;
            };

            match connection.send_text(text.clone(), self.write_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        event = %event.kind(),
                        user = %user_id,
                        connection = %connection.id(),
                        error = %e,
                        "Fan-out write failed"
                    );
                    self.lifecycle.disconnect(&connection).await;
                }
            }
        }

        debug!(
            event = %event.kind(),
            recipients = recipients.len(),
            delivered,
            "Fanned out event"
        );
        Ok(delivered)
    }
}

#[async_trait]
impl EventHandler for FanoutDispatcher {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        self.deliver(event).await.map(|_| ())
    }
}
