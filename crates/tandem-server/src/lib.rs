//! # tandem-server
//!
//! WebSocket gateway for Tandem: authenticated upgrades, per-connection
//! sessions, the gateway listener and event fan-out, wired over an
//! in-memory store.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod session;

pub use config::Config;
pub use handlers::{build_router, run_server, serve, start, AppState};
