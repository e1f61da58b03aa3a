//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_sessions_total` (counter): accepted sessions
//! - `proxy_active_sessions` (gauge): sessions currently open
//! - `proxy_sessions_closed_total` (counter): closed sessions by outcome
//! - `proxy_messages_total` (counter): forwarded messages by direction
//! - `proxy_injections_total` (counter): responses that received the marker
//! - `proxy_routing_failures_total` (counter): routing failures by reason
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exporter only when enabled in configuration

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_session_opened() {
    ::metrics::counter!("proxy_sessions_total").increment(1);
    ::metrics::gauge!("proxy_active_sessions").increment(1.0);
}

pub fn record_session_closed(outcome: &'static str) {
    ::metrics::counter!("proxy_sessions_closed_total", "outcome" => outcome).increment(1);
    ::metrics::gauge!("proxy_active_sessions").decrement(1.0);
}

pub fn record_message(direction: &'static str) {
    ::metrics::counter!("proxy_messages_total", "direction" => direction).increment(1);
}

pub fn record_injection() {
    ::metrics::counter!("proxy_injections_total").increment(1);
}

pub fn record_routing_failure(reason: &'static str) {
    ::metrics::counter!("proxy_routing_failures_total", "reason" => reason).increment(1);
}
