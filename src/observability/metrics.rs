//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define connection, request and upgrade metrics
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `h1_connections_total` (counter): accepted connections
//! - `h1_connections_active` (gauge): currently open connections
//! - `h1_requests_total` (counter): dispatched requests by method
//! - `h1_request_duration_seconds` (histogram): dispatch to response complete
//! - `h1_upgrades_total` (counter): connections handed to an upgrade target
//! - `h1_parse_errors_total` (counter): connections ended by malformed input
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    ::metrics::counter!("h1_connections_total").increment(1);
    ::metrics::gauge!("h1_connections_active").increment(1.0);
}

pub fn record_connection_closed() {
    ::metrics::gauge!("h1_connections_active").decrement(1.0);
}

pub fn record_request(method: &str, started: Instant) {
    ::metrics::counter!("h1_requests_total", "method" => method.to_string()).increment(1);
    ::metrics::histogram!("h1_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_upgrade(protocol: &str) {
    ::metrics::counter!("h1_upgrades_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn record_parse_error() {
    ::metrics::counter!("h1_parse_errors_total").increment(1);
}
