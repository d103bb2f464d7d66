//! Metrics collection and exposition.
//!
//! # Metrics
//! - `arcway_connections_total` (counter): accepted TCP connections
//! - `arcway_active_connections` (gauge): connections currently open
//! - `arcway_http_requests_total` (counter): requests by kind and status
//! - `arcway_ws_messages_total` (counter): WebSocket messages by direction
//! - `arcway_broadcast_failures_total` (counter): members dropped during a broadcast
//! - `arcway_sessions` (gauge): live sessions
//! - `arcway_groups` (gauge): live broadcast groups

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened() {
    metrics::counter!("arcway_connections_total").increment(1);
    metrics::gauge!("arcway_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("arcway_active_connections").decrement(1.0);
}

/// `kind` is one of `static`, `controller`, `upgrade`, `error`.
pub fn record_http_request(kind: &'static str, status: u16) {
    metrics::counter!(
        "arcway_http_requests_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_ws_message(direction: &'static str) {
    metrics::counter!("arcway_ws_messages_total", "direction" => direction).increment(1);
}

pub fn record_broadcast_failures(count: usize) {
    if count > 0 {
        metrics::counter!("arcway_broadcast_failures_total").increment(count as u64);
    }
}

pub fn record_session_count(count: usize) {
    metrics::gauge!("arcway_sessions").set(count as f64);
}

pub fn record_group_count(count: usize) {
    metrics::gauge!("arcway_groups").set(count as f64);
}
