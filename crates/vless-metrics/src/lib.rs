//! Metrics collection and Prometheus exporter for vless-rs.
//!
//! This module provides metrics instrumentation for the tunnel server:
//! connection counts, handshake outcomes, relayed bytes, and error rates.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of TCP connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vless_connections_total";
/// Number of currently active connections.
pub const CONNECTIONS_ACTIVE: &str = "vless_connections_active";
/// Total number of connections rejected before a session started.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vless_connections_rejected_total";
/// Total number of successful authentications.
pub const AUTH_SUCCESS_TOTAL: &str = "vless_auth_success_total";
/// Total number of failed authentications (credential mismatch).
pub const AUTH_FAILURE_TOTAL: &str = "vless_auth_failure_total";
/// Total number of handshakes rejected as malformed.
pub const HANDSHAKE_REJECTED_TOTAL: &str = "vless_handshake_rejected_total";
/// Total number of failed upstream connects.
pub const UPSTREAM_CONNECT_FAILURES_TOTAL: &str = "vless_upstream_connect_failures_total";
/// Upstream connect duration histogram (seconds).
pub const UPSTREAM_CONNECT_DURATION_SECONDS: &str = "vless_upstream_connect_duration_seconds";
/// Total bytes relayed from clients to upstreams.
pub const BYTES_CLIENT_TO_UPSTREAM_TOTAL: &str = "vless_bytes_client_to_upstream_total";
/// Total bytes relayed from upstreams to clients.
pub const BYTES_UPSTREAM_TO_CLIENT_TOTAL: &str = "vless_bytes_upstream_to_client_total";
/// Connection duration histogram (seconds).
pub const CONNECTION_DURATION_SECONDS: &str = "vless_connection_duration_seconds";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "vless_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new connection accepted.
#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed.
#[inline]
pub fn record_connection_closed(duration_secs: f64) {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(duration_secs);
}

/// Record a connection rejected before a session started.
#[inline]
pub fn record_connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record successful authentication.
#[inline]
pub fn record_auth_success() {
    counter!(AUTH_SUCCESS_TOTAL).increment(1);
}

/// Record failed authentication (silent close).
#[inline]
pub fn record_auth_failure() {
    counter!(AUTH_FAILURE_TOTAL).increment(1);
}

/// Record a malformed handshake.
#[inline]
pub fn record_handshake_rejected() {
    counter!(HANDSHAKE_REJECTED_TOTAL).increment(1);
}

/// Record a failed upstream connect.
#[inline]
pub fn record_upstream_connect_failure() {
    counter!(UPSTREAM_CONNECT_FAILURES_TOTAL).increment(1);
}

/// Record upstream connect duration.
#[inline]
pub fn record_upstream_connect_duration(duration_secs: f64) {
    histogram!(UPSTREAM_CONNECT_DURATION_SECONDS).record(duration_secs);
}

/// Record bytes relayed from a client to its upstream.
#[inline]
pub fn record_client_to_upstream_bytes(bytes: u64) {
    counter!(BYTES_CLIENT_TO_UPSTREAM_TOTAL).increment(bytes);
}

/// Record bytes relayed from an upstream to its client.
#[inline]
pub fn record_upstream_to_client_bytes(bytes: u64) {
    counter!(BYTES_UPSTREAM_TO_CLIENT_TOTAL).increment(bytes);
}

/// Record an error by type label.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}
