//! # vncrelay
//!
//! A relay that lets browser VNC viewers reach VNC servers over WebSocket or
//! plain TCP.
//!
//! ## Crates
//!
//! - [`vncrelay_core`] - Endpoints, defaults and the bidirectional relay
//! - [`vncrelay_config`] - Configuration loading, validation and CLI overrides
//! - [`vncrelay_metrics`] - Prometheus-compatible metrics
//! - [`vncrelay_server`] - Listeners, session registry and lifecycle

pub use vncrelay_config as config;
pub use vncrelay_core as core;
pub use vncrelay_metrics as metrics;
pub use vncrelay_server as server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use vncrelay_config::{Config, ListenerConfig, Transport, load_config, validate_config};
    pub use vncrelay_core::TargetEndpoint;
    pub use vncrelay_server::{
        CancellationToken, CloseReport, Server, ServerError, SessionRegistry, ShutdownTrigger,
        run_with_shutdown,
    };
}
