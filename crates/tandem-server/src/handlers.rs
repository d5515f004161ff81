//! HTTP handlers and server wiring for Tandem.
//!
//! Builds the shared state (store, registry, event bus, services), upgrades
//! authenticated WebSocket requests into sessions and runs the server until
//! ctrl-c.

use crate::auth::{self, StaticTokenVerifier, TokenVerifier};
use crate::config::Config;
use crate::metrics;
use crate::session::{self, ConnectionSlots};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    dispatch_channel, ChatService, ConnectionLifecycle, DispatchReceiver, DispatchSender, EventBus,
    FanoutDispatcher, GatewayListener, MatchService, MemoryStore, OnlineService, ProfileService,
    Registry,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How often bus counters are copied into metrics.
const METRICS_SAMPLE_PERIOD: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<Registry>,
    pub bus: EventBus,
    pub lifecycle: ConnectionLifecycle,
    pub presence: OnlineService,
    pub matches: MatchService,
    pub chats: ChatService,
    pub profiles: ProfileService,
    /// Sending half of the channel every read loop feeds.
    pub dispatch: DispatchSender,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Sessions counted against `max_connections`.
    pub slots: Arc<ConnectionSlots>,
}

impl AppState {
    /// Create new app state and the receiving half of the dispatch channel.
    ///
    /// Starts the event bus, so it must be called inside a tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> (Self, DispatchReceiver) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(Registry::new());
        let bus = EventBus::start(config.events.bus_config());

        let presence = OnlineService::new(store.clone(), store.clone(), bus.clone());
        let lifecycle = ConnectionLifecycle::new(registry.clone(), presence.clone());
        let matches = MatchService::new(store.clone(), store.clone(), bus.clone());
        let chats = ChatService::new(store.clone(), store.clone(), bus.clone());
        let profiles = ProfileService::new(store.clone(), store.clone(), bus.clone());
        let verifier = Arc::new(StaticTokenVerifier::new(config.auth.tokens.clone()));
        let (dispatch, rx) = dispatch_channel(config.limits.dispatch_capacity);
        let slots = Arc::new(ConnectionSlots::new(config.limits.max_connections));

        let state = Self {
            config,
            store,
            registry,
            bus,
            lifecycle,
            presence,
            matches,
            chats,
            profiles,
            dispatch,
            verifier,
            slots,
        };
        (state, rx)
    }
}

/// Build the state and start the background consumers: fan-out on the
/// event bus and the gateway listener on the dispatch channel.
#[must_use]
pub fn start(config: Config) -> Arc<AppState> {
    let (state, rx) = AppState::new(config);
    let write_timeout = state.config.heartbeat.write_timeout();

    Arc::new(FanoutDispatcher::new(
        state.registry.clone(),
        state.lifecycle.clone(),
        write_timeout,
    ))
    .register_all(&state.bus);

    let listener = GatewayListener::new(
        state.registry.clone(),
        state.store.clone(),
        state.lifecycle.clone(),
        write_timeout,
    );
    tokio::spawn(listener.run(rx));

    Arc::new(state)
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = start(config.clone());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_sampler(state.bus.clone(), state.registry.clone(), METRICS_SAMPLE_PERIOD);
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tandem server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state.clone(), shutdown_signal()).await?;

    info!("HTTP server stopped, draining event bus");
    state.bus.shutdown(config.events.shutdown_grace()).await;
    metrics::record_bus_stats(state.bus.stats());

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.len(),
    }))
}

fn reject(status: StatusCode, reason: &'static str) -> Response {
    metrics::record_rejected_upgrade(reason);
    (status, reason).into_response()
}

/// WebSocket upgrade handler.
///
/// Checks origin, token and capacity before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !auth::origin_allowed(&headers, &state.config.auth.allowed_origins) {
        warn!(remote = %remote, "Rejected upgrade: origin not allowed");
        return reject(StatusCode::FORBIDDEN, "origin not allowed");
    }

    let user_id = match auth::extract_token(&headers, &query)
        .and_then(|token| state.verifier.verify(&token))
    {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(remote = %remote, error = %e, "Rejected upgrade: unauthorized");
            return reject(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    };

    // A reconnect replaces an existing entry, so it never counts against the limit
    let reconnecting = state.registry.is_connected(&user_id);
    let Some(slot) = state.slots.try_acquire(reconnecting) else {
        warn!(remote = %remote, user = %user_id, "Rejected upgrade: at capacity");
        return reject(StatusCode::SERVICE_UNAVAILABLE, "at capacity");
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            session::run(socket, user_id, Some(remote), state).await;
            drop(slot);
        })
}
