// src/core/metrics.rs

//! Defines and registers Prometheus metrics for bridge monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of WebSocket clients currently connected.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("pubsub_bridge_connected_clients", "Number of currently connected clients.").unwrap();


    // --- Counters ---
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("pubsub_bridge_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of connections turned away because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("pubsub_bridge_connections_rejected_total", "Total number of connections rejected at the client limit.").unwrap();
    /// Closed connections, labeled by what triggered the shutdown.
    pub static ref CONNECTIONS_CLOSED_TOTAL: CounterVec =
        register_counter_vec!("pubsub_bridge_connections_closed_total", "Total number of connections closed, labeled by cause.", &["cause"]).unwrap();
    /// Parsed commands, labeled by verb.
    pub static ref COMMANDS_PROCESSED_TOTAL: CounterVec =
        register_counter_vec!("pubsub_bridge_commands_processed_total", "Total number of commands processed, labeled by verb.", &["command"]).unwrap();
    /// Failed commands, labeled by error kind (`parse` or `exec`).
    pub static ref COMMAND_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("pubsub_bridge_command_errors_total", "Total number of failed commands, labeled by error kind.", &["kind"]).unwrap();
    /// Deliveries written to clients.
    pub static ref DELIVERIES_FORWARDED_TOTAL: Counter =
        register_counter!("pubsub_bridge_deliveries_forwarded_total", "Total number of deliveries forwarded to clients.").unwrap();
    /// Keepalive pings written to clients.
    pub static ref PINGS_SENT_TOTAL: Counter =
        register_counter!("pubsub_bridge_pings_sent_total", "Total number of keepalive pings sent.").unwrap();


    // --- Histograms ---
    /// Time spent executing a command against the backend.
    pub static ref COMMAND_LATENCY_SECONDS: Histogram =
        register_histogram!("pubsub_bridge_command_latency_seconds", "Latency of command execution in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
