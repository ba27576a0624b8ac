//! Core types and primitives shared across vncrelay crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type labels for metrics/logging
//! - [`TargetEndpoint`], the validated `host:port` a relay connects to
//! - The bidirectional byte relay used by every session
//! - Transport adapters (WebSocket) that expose a plain byte stream

pub mod defaults;
pub mod endpoint;
pub mod errors;
pub mod io;
pub mod transport;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use endpoint::{EndpointError, TargetEndpoint};
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "vncrelay";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
