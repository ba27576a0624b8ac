//! Error type labels for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// Malformed `host:port` target.
pub const ERROR_INVALID_ENDPOINT: &str = "invalid_endpoint";
/// Listening socket could not be created.
pub const ERROR_BIND: &str = "bind";
/// Upstream connect failed or timed out.
pub const ERROR_UPSTREAM_UNREACHABLE: &str = "upstream_unreachable";
/// Read or write failed mid-stream.
pub const ERROR_RELAY_IO: &str = "relay_io";
/// WebSocket upgrade failed or timed out.
pub const ERROR_HANDSHAKE: &str = "handshake";
/// Session outlived the shutdown grace period.
pub const ERROR_FORCED_CLOSE: &str = "forced_close";
/// Generic I/O error outside a session.
pub const ERROR_IO: &str = "io";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
