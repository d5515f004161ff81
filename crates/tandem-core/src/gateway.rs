//! Gateway listener.
//!
//! Single consumer of the dispatch channel all sessions write into. Relay
//! actions are forwarded to the other participant of the conversation named
//! in the payload; `onLeaving` tears the originating connection down.

use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::{Action, InboundFrame, OutboundFrame};
use tandem_transport::ConnectionHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::lifecycle::ConnectionLifecycle;
use crate::registry::Registry;
use crate::repository::ConversationRepository;

/// A decoded client frame together with the connection it arrived on.
#[derive(Clone)]
pub struct InboundAction {
    pub frame: InboundFrame,
    pub connection: ConnectionHandle,
}

pub type DispatchSender = mpsc::Sender<InboundAction>;
pub type DispatchReceiver = mpsc::Receiver<InboundAction>;

/// Create the bounded dispatch channel. Senders wait when it is full.
#[must_use]
pub fn dispatch_channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Routes inbound client actions.
pub struct GatewayListener {
    registry: Arc<Registry>,
    conversations: Arc<dyn ConversationRepository>,
    lifecycle: ConnectionLifecycle,
    write_timeout: Duration,
}

impl GatewayListener {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        conversations: Arc<dyn ConversationRepository>,
        lifecycle: ConnectionLifecycle,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            conversations,
            lifecycle,
            write_timeout,
        }
    }

    /// Consume actions until every sender is dropped.
    pub async fn run(self, mut rx: DispatchReceiver) {
        info!("Gateway listener started");
        while let Some(action) = rx.recv().await {
            self.handle(action).await;
        }
        info!("Gateway listener stopped");
    }

    /// Handle one action. Returns `true` if a frame was relayed.
    pub async fn handle(&self, inbound: InboundAction) -> bool {
        let InboundAction { frame, connection } = inbound;

        if !frame.action.is_relay() {
            debug!(connection = %connection.id(), "Client is leaving");
            self.lifecycle.disconnect(&connection).await;
            return false;
        }

        self.relay(frame.action, &frame.payload, &connection).await
    }

    async fn relay(&self, action: Action, conversation_id: &str, origin: &ConnectionHandle) -> bool {
        let Some(sender) = self.registry.user_of(origin.id()) else {
            debug!(connection = %origin.id(), action = %action, "Action from unbound connection");
            return false;
        };

        let conversation = match self.conversations.select_conversation_by_id(conversation_id).await {
            Ok(conversation) => conversation,
            Err(e) if e.is_not_found() => {
                debug!(user = %sender, conversation = %conversation_id, "Relay to unknown conversation");
                return false;
            }
            Err(e) => {
                warn!(user = %sender, conversation = %conversation_id, error = %e, "Conversation lookup failed");
                return false;
            }
        };

        let Some(target) = conversation.other_party(&sender) else {
            warn!(
                user = %sender,
                conversation = %conversation_id,
                action = %action,
                "Sender is not a participant"
            );
            return false;
        };

        let Some(connection) = self.registry.connection_of(target) else {
            trace!(user = %target, action = %action, "Relay target offline");
            return false;
        };

        let frame = OutboundFrame::relay(action, conversation_id);
        match connection.send_frame(&frame, self.write_timeout).await {
            Ok(()) => {
                trace!(from = %sender, to = %target, action = %action, "Relayed action");
                true
            }
            Err(e) => {
                warn!(user = %target, connection = %connection.id(), error = %e, "Relay write failed");
                self.lifecycle.disconnect(&connection).await;
                false
            }
        }
    }
}
