//! Configuration type definitions for listeners, timeouts, limits, TCP, metrics, and logging.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vncrelay_core::{EndpointError, TargetEndpoint};

use crate::defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listening sockets; each forwards to its own target.
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// TCP socket options for accepted and upstream connections.
    #[serde(default)]
    pub tcp: TcpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How clients speak to a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Raw TCP; bytes are relayed as-is.
    #[default]
    Tcp,
    /// WebSocket upgrade first; binary message payloads are relayed.
    Websocket,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Websocket => "websocket",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listening socket and the VNC server it forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Name used in logs and metrics. Defaults to the listen address.
    #[serde(default)]
    pub name: Option<String>,
    /// Bind address, e.g. `0.0.0.0:6080`. A bare port binds all interfaces.
    pub listen: String,
    /// Upstream `host:port`, e.g. `172.17.124.179:5900`.
    pub target: String,
    #[serde(default)]
    pub transport: Transport,
    /// Only used when `transport = "websocket"`.
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

impl ListenerConfig {
    pub fn new(listen: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: None,
            listen: listen.into(),
            target: target.into(),
            transport: Transport::default(),
            websocket: WebSocketConfig::default(),
        }
    }

    /// Name shown in logs and metrics labels.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.listen)
    }

    /// Parsed bind address.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        parse_listen_addr(&self.listen)
    }

    /// Parsed target endpoint.
    pub fn target_endpoint(&self) -> Result<TargetEndpoint, EndpointError> {
        TargetEndpoint::parse(&self.target)
    }
}

/// Parse `ip:port`, `[v6]:port`, or a bare port (all interfaces).
pub fn parse_listen_addr(s: &str) -> Option<SocketAddr> {
    let s = s.trim();
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        let port = s.parse::<u16>().ok()?;
        return Some(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    s.parse().ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Upgrade requests for any other path are answered with 404.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Let clients pick the target with `?host=..&port=..` (or `ip=`).
    #[serde(default)]
    pub allow_target_query: bool,
    #[serde(default = "default_ws_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            allow_target_query: false,
            max_frame_bytes: default_ws_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Upper bound for establishing the upstream connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for the WebSocket upgrade.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Close sessions with no traffic for this long (0 = never).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How long shutdown waits for sessions to drain before forcing them closed.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl TimeoutsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Configuration for resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Buffer size per relay direction (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
    /// Maximum concurrent sessions across all listeners (None = unlimited).
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            relay_buffer_size: default_relay_buffer_size(),
            connection_backlog: default_connection_backlog(),
            max_sessions: None,
        }
    }
}

/// TCP socket configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Disable Nagle's algorithm (TCP_NODELAY) for lower latency.
    #[serde(default = "default_tcp_no_delay")]
    pub no_delay: bool,
    /// TCP Keep-Alive interval in seconds (0 = disabled).
    #[serde(default = "default_tcp_keepalive_secs")]
    pub keepalive_secs: u64,
    /// SO_SNDBUF for upstream connections (0 = OS default).
    #[serde(default = "default_tcp_send_buffer")]
    pub send_buffer: usize,
    /// SO_RCVBUF for upstream connections (0 = OS default).
    #[serde(default = "default_tcp_recv_buffer")]
    pub recv_buffer: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            no_delay: default_tcp_no_delay(),
            keepalive_secs: default_tcp_keepalive_secs(),
            send_buffer: default_tcp_send_buffer(),
            recv_buffer: default_tcp_recv_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Prometheus exporter address; disabled when unset.
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"vncrelay_server": "debug"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = Config::default();
        assert!(cfg.listeners.is_empty());
        assert_eq!(cfg.timeouts.connect_timeout_secs, 10);
        assert_eq!(cfg.timeouts.idle_timeout(), None);
        assert_eq!(cfg.limits.relay_buffer_size, 32768);
        assert!(cfg.limits.max_sessions.is_none());
        assert!(cfg.tcp.no_delay);
        assert!(cfg.metrics.listen.is_none());
    }

    #[test]
    fn listener_deserialize_minimal() {
        let toml_str = r#"
listen = "0.0.0.0:6080"
target = "172.17.124.179:5900"
"#;
        let l: ListenerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(l.transport, Transport::Tcp);
        assert_eq!(l.display_name(), "0.0.0.0:6080");
        assert_eq!(l.websocket.path, "/");
        assert!(!l.websocket.allow_target_query);
        assert_eq!(l.target_endpoint().unwrap().port(), 5900);
    }

    #[test]
    fn listener_deserialize_websocket() {
        let toml_str = r#"
name = "desk"
listen = "127.0.0.1:6080"
target = "localhost:5900"
transport = "websocket"

[websocket]
path = "/websockify"
allow_target_query = true
"#;
        let l: ListenerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(l.display_name(), "desk");
        assert_eq!(l.transport, Transport::Websocket);
        assert_eq!(l.websocket.path, "/websockify");
        assert!(l.websocket.allow_target_query);
        assert_eq!(l.websocket.max_frame_bytes, 1 << 20);
    }

    #[test]
    fn parse_listen_addr_forms() {
        assert_eq!(
            parse_listen_addr("6080"),
            Some("0.0.0.0:6080".parse().unwrap())
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:6080"),
            Some("127.0.0.1:6080".parse().unwrap())
        );
        assert_eq!(parse_listen_addr("[::1]:6080"), Some("[::1]:6080".parse().unwrap()));
        assert_eq!(parse_listen_addr("localhost:6080"), None);
        assert_eq!(parse_listen_addr("70000"), None);
        assert_eq!(parse_listen_addr(""), None);
    }

    #[test]
    fn timeouts_durations() {
        let t = TimeoutsConfig {
            idle_timeout_secs: 90,
            ..Default::default()
        };
        assert_eq!(t.idle_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(t.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(t.handshake_timeout(), Duration::from_secs(10));
    }
}
