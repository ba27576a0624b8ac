//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `vncrelay_core::defaults`.

use vncrelay_core::defaults;

/// Generate default value functions that forward to vncrelay_core::defaults constants.
macro_rules! default_fns {
    // For Copy types (integers, bool, etc.)
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_connect_timeout_secs   => DEFAULT_CONNECT_TIMEOUT_SECS: u64,
    default_handshake_timeout_secs => DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64,
    default_idle_timeout_secs      => DEFAULT_IDLE_TIMEOUT_SECS: u64,
    default_shutdown_grace_secs    => DEFAULT_SHUTDOWN_GRACE_SECS: u64,
    default_relay_buffer_size      => DEFAULT_RELAY_BUFFER_SIZE: usize,
    min_relay_buffer_size          => MIN_RELAY_BUFFER_SIZE: usize,
    max_relay_buffer_size          => MAX_RELAY_BUFFER_SIZE: usize,
    default_connection_backlog     => DEFAULT_CONNECTION_BACKLOG: u32,
    default_ws_max_frame_bytes     => DEFAULT_WS_MAX_FRAME_BYTES: usize,
    // TCP socket options
    default_tcp_no_delay           => DEFAULT_TCP_NO_DELAY: bool,
    default_tcp_keepalive_secs     => DEFAULT_TCP_KEEPALIVE_SECS: u64,
    default_tcp_send_buffer        => DEFAULT_TCP_SEND_BUFFER: usize,
    default_tcp_recv_buffer        => DEFAULT_TCP_RECV_BUFFER: usize,
}

default_string_fns! {
    default_ws_path => DEFAULT_WS_PATH,
}
