//! Metrics collection and export for Tandem.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{EventBus, EventBusStats, Registry};
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tandem_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tandem_connections_active";
    pub const USERS_CONNECTED: &str = "tandem_users_connected";
    pub const MESSAGES_TOTAL: &str = "tandem_messages_total";
    pub const MESSAGES_BYTES: &str = "tandem_messages_bytes";
    pub const DISPATCH_WAIT_SECONDS: &str = "tandem_dispatch_wait_seconds";
    pub const UPGRADES_REJECTED: &str = "tandem_upgrades_rejected_total";
    pub const EVENTS_QUEUED: &str = "tandem_events_queued_total";
    pub const EVENTS_DISPATCHED: &str = "tandem_events_dispatched_total";
    pub const EVENTS_FAILED: &str = "tandem_events_failed_total";
    pub const EVENTS_DROPPED: &str = "tandem_events_dropped_total";
    pub const ERRORS_TOTAL: &str = "tandem_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(
        names::USERS_CONNECTED,
        "Users with a live connection in the registry"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_histogram!(
        names::DISPATCH_WAIT_SECONDS,
        "Time a read loop waited to hand an action to the gateway"
    );
    metrics::describe_counter!(names::UPGRADES_REJECTED, "Rejected WebSocket upgrades");
    metrics::describe_counter!(names::EVENTS_QUEUED, "Event handler invocations queued");
    metrics::describe_counter!(names::EVENTS_DISPATCHED, "Event handler invocations completed");
    metrics::describe_counter!(names::EVENTS_FAILED, "Event handler invocations that failed");
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Event handler invocations dropped on a full queue"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record how long a read loop waited on the dispatch channel.
pub fn record_dispatch_wait(seconds: f64) {
    histogram!(names::DISPATCH_WAIT_SECONDS).record(seconds);
}

/// Record a rejected upgrade.
pub fn record_rejected_upgrade(reason: &'static str) {
    counter!(names::UPGRADES_REJECTED, "reason" => reason).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Publish event bus counters.
pub fn record_bus_stats(stats: EventBusStats) {
    counter!(names::EVENTS_QUEUED).absolute(stats.queued);
    counter!(names::EVENTS_DISPATCHED).absolute(stats.dispatched);
    counter!(names::EVENTS_FAILED).absolute(stats.failed);
    counter!(names::EVENTS_DROPPED).absolute(stats.dropped);
}

/// Periodically copy bus counters and the registry size into metrics.
pub fn spawn_sampler(bus: EventBus, registry: Arc<Registry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            record_bus_stats(bus.stats());
            gauge!(names::USERS_CONNECTED).set(registry.len() as f64);
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
