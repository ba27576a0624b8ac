//! State shared by the sessions of one listener.

use std::sync::Arc;
use std::time::Duration;

use vncrelay_config::{Config, TcpConfig, Transport, WebSocketConfig};
use vncrelay_core::TargetEndpoint;
use vncrelay_core::io::RelayOptions;

use crate::registry::SessionRegistry;

/// Per-session tunables, identical for every listener.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub relay: RelayOptions,
    pub tcp: TcpConfig,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.timeouts.connect_timeout(),
            handshake_timeout: config.timeouts.handshake_timeout(),
            relay: RelayOptions {
                buffer_size: config.limits.relay_buffer_size,
                idle_timeout: config.timeouts.idle_timeout(),
            },
            tcp: config.tcp.clone(),
        }
    }
}

/// Everything a session needs from the listener that accepted it.
#[derive(Debug, Clone)]
pub struct ListenerContext {
    pub name: Arc<str>,
    pub target: TargetEndpoint,
    pub transport: Transport,
    pub websocket: WebSocketConfig,
    pub settings: Arc<SessionSettings>,
    pub registry: SessionRegistry,
}
