//! Metrics collection and Prometheus exporter for veiltun.
//!
//! Connection counts, handshake outcomes, relay byte counters and error
//! rates, exposed over an optional HTTP listener.

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

/// Total number of inbound connections accepted.
pub const CONNECTIONS_TOTAL: &str = "veiltun_connections_total";
/// Number of currently active connections.
pub const CONNECTIONS_ACTIVE: &str = "veiltun_connections_active";
/// Total number of connections rejected before handling.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "veiltun_connections_rejected_total";
/// Connection duration histogram (seconds).
pub const CONNECTION_DURATION_SECONDS: &str = "veiltun_connection_duration_seconds";
/// Total number of handshakes that failed to decode, by reason.
pub const HANDSHAKE_FAILURES_TOTAL: &str = "veiltun_handshake_failures_total";
/// Total number of upstream connections established.
pub const UPSTREAM_CONNECTS_TOTAL: &str = "veiltun_upstream_connects_total";
/// Upstream connect duration histogram (seconds).
pub const UPSTREAM_CONNECT_DURATION_SECONDS: &str = "veiltun_upstream_connect_duration_seconds";
/// Total number of failed upstream connection attempts.
pub const UPSTREAM_CONNECT_FAILURES_TOTAL: &str = "veiltun_upstream_connect_failures_total";
/// Total bytes forwarded from inbound frames to upstream sockets.
pub const BYTES_INBOUND_TOTAL: &str = "veiltun_bytes_inbound_total";
/// Total bytes forwarded from upstream sockets to inbound frames.
pub const BYTES_OUTBOUND_TOTAL: &str = "veiltun_bytes_outbound_total";
/// Total number of relays torn down, by cause.
pub const RELAY_TEARDOWN_TOTAL: &str = "veiltun_relay_teardown_total";
/// Total number of discovery endpoint hits.
pub const DISCOVERY_REQUESTS_TOTAL: &str = "veiltun_discovery_requests_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "veiltun_errors_total";

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

/// Record a rejected connection (reason: "max_connections").
#[inline]
pub fn record_connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a handshake decode failure by reason.
#[inline]
pub fn record_handshake_failure(reason: &'static str) {
    counter!(HANDSHAKE_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Record a successful upstream connect and its duration.
#[inline]
pub fn record_upstream_connect(duration_secs: f64) {
    counter!(UPSTREAM_CONNECTS_TOTAL).increment(1);
    histogram!(UPSTREAM_CONNECT_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed upstream connection attempt.
#[inline]
pub fn record_upstream_connect_failure() {
    counter!(UPSTREAM_CONNECT_FAILURES_TOTAL).increment(1);
}

/// Record bytes forwarded inbound -> upstream.
#[inline]
pub fn record_bytes_inbound(bytes: u64) {
    counter!(BYTES_INBOUND_TOTAL).increment(bytes);
}

/// Record bytes forwarded upstream -> inbound.
#[inline]
pub fn record_bytes_outbound(bytes: u64) {
    counter!(BYTES_OUTBOUND_TOTAL).increment(bytes);
}

/// Record why a relay ended (e.g. "inbound_closed", "idle_timeout").
#[inline]
pub fn record_relay_teardown(cause: &'static str) {
    counter!(RELAY_TEARDOWN_TOTAL, "cause" => cause).increment(1);
}

/// Record a discovery endpoint hit.
#[inline]
pub fn record_discovery_request() {
    counter!(DISCOVERY_REQUESTS_TOTAL).increment(1);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

// ============================================================================
// Error Type Constants (re-exported from veiltun-core)
// ============================================================================

pub use veiltun_core::{
    ERROR_CONFIG, ERROR_IO, ERROR_PROTOCOL, ERROR_RESOLVE, ERROR_TIMEOUT, ERROR_TRANSPORT,
    ERROR_UPSTREAM,
};
