//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;
use crate::types::*;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Listen address of the first listener, e.g. 0.0.0.0:6080 or just 6080
    #[arg(long)]
    pub listen: Option<String>,
    /// Target VNC server of the first listener, e.g. 172.17.124.179:5900
    #[arg(long)]
    pub target: Option<String>,
    /// Transport of the first listener
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,
    /// WebSocket upgrade path of the first listener
    #[arg(long)]
    pub ws_path: Option<String>,
    /// Allow ?host=&port= target selection on the first listener
    #[arg(long)]
    pub ws_allow_target_query: Option<bool>,
    /// Upstream connect timeout (seconds)
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,
    /// WebSocket handshake timeout (seconds)
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,
    /// Session idle timeout (seconds, 0 = disabled)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
    /// Grace period for draining sessions on shutdown (seconds)
    #[arg(long)]
    pub shutdown_grace_secs: Option<u64>,
    /// Buffer size per relay direction (bytes)
    #[arg(long)]
    pub relay_buffer_size: Option<usize>,
    /// TCP listener backlog size
    #[arg(long)]
    pub connection_backlog: Option<u32>,
    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long)]
    pub max_sessions: Option<usize>,
    /// Set TCP_NODELAY (true/false)
    #[arg(long)]
    pub tcp_no_delay: Option<bool>,
    /// TCP Keep-Alive interval in seconds (0 = disabled)
    #[arg(long)]
    pub tcp_keepalive_secs: Option<u64>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl CliOverrides {
    fn touches_listener(&self) -> bool {
        self.listen.is_some()
            || self.target.is_some()
            || self.transport.is_some()
            || self.ws_path.is_some()
            || self.ws_allow_target_query.is_some()
    }
}

/// Apply CLI overrides on top of a loaded config.
///
/// Listener flags edit the first listener. With no listeners configured,
/// `--listen` and `--target` together create one.
pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if overrides.touches_listener() {
        if config.listeners.is_empty()
            && let (Some(listen), Some(target)) = (&overrides.listen, &overrides.target)
        {
            config
                .listeners
                .push(ListenerConfig::new(listen.clone(), target.clone()));
        }
        if let Some(listener) = config.listeners.first_mut() {
            if let Some(v) = &overrides.listen {
                listener.listen = v.clone();
            }
            if let Some(v) = &overrides.target {
                listener.target = v.clone();
            }
            if let Some(v) = overrides.transport {
                listener.transport = v;
            }
            if let Some(v) = &overrides.ws_path {
                listener.websocket.path = v.clone();
            }
            if let Some(v) = overrides.ws_allow_target_query {
                listener.websocket.allow_target_query = v;
            }
        }
    }

    if let Some(v) = overrides.connect_timeout_secs {
        config.timeouts.connect_timeout_secs = v;
    }
    if let Some(v) = overrides.handshake_timeout_secs {
        config.timeouts.handshake_timeout_secs = v;
    }
    if let Some(v) = overrides.idle_timeout_secs {
        config.timeouts.idle_timeout_secs = v;
    }
    if let Some(v) = overrides.shutdown_grace_secs {
        config.timeouts.shutdown_grace_secs = v;
    }
    if let Some(v) = overrides.relay_buffer_size {
        config.limits.relay_buffer_size = v;
    }
    if let Some(v) = overrides.connection_backlog {
        config.limits.connection_backlog = v;
    }
    if let Some(v) = overrides.max_sessions {
        config.limits.max_sessions = if v == 0 { None } else { Some(v) };
    }
    if let Some(v) = overrides.tcp_no_delay {
        config.tcp.no_delay = v;
    }
    if let Some(v) = overrides.tcp_keepalive_secs {
        config.tcp.keepalive_secs = v;
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
}
