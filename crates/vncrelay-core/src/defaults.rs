//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default upstream connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default WebSocket upgrade timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default relay idle timeout in seconds (0 = disabled).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;
/// Default graceful shutdown grace period in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default relay buffer size per direction (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Smallest accepted relay buffer size.
pub const MIN_RELAY_BUFFER_SIZE: usize = 1024;
/// Largest accepted relay buffer size (1 MiB).
pub const MAX_RELAY_BUFFER_SIZE: usize = 1024 * 1024;
/// Default TCP socket send buffer size (0 = OS default).
pub const DEFAULT_TCP_SEND_BUFFER: usize = 0;
/// Default TCP socket receive buffer size (0 = OS default).
pub const DEFAULT_TCP_RECV_BUFFER: usize = 0;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY. VNC pointer and key events are tiny and latency bound.
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP Keep-Alive interval in seconds (0 = disabled).
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 300;

// ============================================================================
// Connection Defaults
// ============================================================================

/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Back-off after a failed `accept` before trying again, in milliseconds.
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 50;

// ============================================================================
// WebSocket Defaults
// ============================================================================

/// Default WebSocket upgrade path.
pub const DEFAULT_WS_PATH: &str = "/";
/// Default max WebSocket frame/message size.
pub const DEFAULT_WS_MAX_FRAME_BYTES: usize = 1 << 20;
/// Subprotocol requested by browser VNC clients for raw binary frames.
pub const WS_BINARY_SUBPROTOCOL: &str = "binary";

