//! # tandem-core
//!
//! Realtime presence and event fan-out core for the Tandem gateway.
//!
//! - **Registry** - bidirectional `connection <-> user` index
//! - **EventBus** - named domain events dispatched to handlers on a bounded worker pool
//! - **Matching** - two-dimensional match state machine (request, reveal)
//! - **Presence** - online/offline records driven by connection lifecycle
//! - **Fanout** - turns domain events into socket writes
//! - **Gateway** - consumes client actions from the shared dispatch channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  actions   ┌─────────────┐  relay   ┌─────────────┐
//! │   Session   │──────────▶│   Gateway   │────────▶│  Registry   │
//! └─────────────┘            └─────────────┘          └─────────────┘
//!                                                            ▲
//! ┌─────────────┐  trigger   ┌─────────────┐  lookup         │
//! │  Services   │──────────▶│  EventBus   │──▶ Fanout ──────┘
//! └─────────────┘            └─────────────┘
//! ```

pub mod bus;
pub mod chat;
pub mod events;
pub mod fanout;
pub mod gateway;
pub mod lifecycle;
pub mod matching;
pub mod memory;
pub mod model;
pub mod presence;
pub mod profile;
pub mod registry;
pub mod repository;

pub use bus::{EventBus, EventBusConfig, EventBusStats, EventHandler, HandlerError};
pub use chat::{ChatError, ChatService};
pub use events::{DomainEvent, EventKind};
pub use fanout::FanoutDispatcher;
pub use gateway::{dispatch_channel, DispatchReceiver, DispatchSender, GatewayListener, InboundAction};
pub use lifecycle::ConnectionLifecycle;
pub use matching::{MatchError, MatchService};
pub use memory::MemoryStore;
pub use model::{Chat, Conversation, Match, MatchStatus, OnlineRecord, Profile, UserId};
pub use presence::OnlineService;
pub use profile::ProfileService;
pub use registry::Registry;
pub use repository::RepositoryError;
