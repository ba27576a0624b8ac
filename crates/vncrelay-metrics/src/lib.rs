//! Metrics collection and Prometheus exporter for vncrelay.
//!
//! Session counts, relayed bytes per direction, connect and session
//! durations, and error rates. Recording is a no-op until a recorder is
//! installed, so library users that never call [`init_prometheus`] pay
//! almost nothing.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
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

/// Total number of client connections accepted.
pub const SESSIONS_TOTAL: &str = "vncrelay_sessions_total";
/// Number of currently registered sessions.
pub const SESSIONS_ACTIVE: &str = "vncrelay_sessions_active";
/// Total number of connections rejected before a session started.
pub const SESSIONS_REJECTED_TOTAL: &str = "vncrelay_sessions_rejected_total";
/// Total number of sessions forcibly closed after the shutdown grace period.
pub const SESSIONS_FORCED_CLOSE_TOTAL: &str = "vncrelay_sessions_forced_close_total";
/// Total bytes relayed, labelled by direction.
pub const BYTES_TOTAL: &str = "vncrelay_bytes_total";
/// Upstream connect duration histogram (seconds).
pub const UPSTREAM_CONNECT_DURATION_SECONDS: &str = "vncrelay_upstream_connect_duration_seconds";
/// WebSocket handshake duration histogram (seconds).
pub const HANDSHAKE_DURATION_SECONDS: &str = "vncrelay_handshake_duration_seconds";
/// Session duration histogram (seconds).
pub const SESSION_DURATION_SECONDS: &str = "vncrelay_session_duration_seconds";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "vncrelay_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new session accepted on `listener`.
///
/// Listener names come from configuration, so the label set stays bounded.
#[inline]
pub fn record_session_accepted(listener: &str) {
    counter!(SESSIONS_TOTAL, "listener" => listener.to_owned()).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Record a session torn down.
#[inline]
pub fn record_session_closed(duration_secs: f64) {
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(duration_secs);
}

/// Record a rejected connection (reason: "max_sessions", "shutting_down").
#[inline]
pub fn record_session_rejected(reason: &'static str) {
    counter!(SESSIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record sessions that had to be forcibly closed.
#[inline]
pub fn record_forced_closes(count: u64) {
    counter!(SESSIONS_FORCED_CLOSE_TOTAL).increment(count);
}

/// Record relayed bytes ("client_to_upstream" or "upstream_to_client").
#[inline]
pub fn record_bytes(direction: &'static str, bytes: u64) {
    counter!(BYTES_TOTAL, "direction" => direction).increment(bytes);
}

/// Record how long the upstream connect took.
#[inline]
pub fn record_upstream_connect_duration(duration_secs: f64) {
    histogram!(UPSTREAM_CONNECT_DURATION_SECONDS).record(duration_secs);
}

/// Record WebSocket handshake duration.
#[inline]
pub fn record_handshake_duration(duration_secs: f64) {
    histogram!(HANDSHAKE_DURATION_SECONDS).record(duration_secs);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

// ============================================================================
// Error Type Constants (re-exported from vncrelay-core)
// ============================================================================

pub use vncrelay_core::{
    ERROR_BIND, ERROR_CONFIG, ERROR_FORCED_CLOSE, ERROR_HANDSHAKE, ERROR_INVALID_ENDPOINT,
    ERROR_IO, ERROR_RELAY_IO, ERROR_UPSTREAM_UNREACHABLE,
};
