//! Configuration loading, validation and CLI overrides for vncrelay.
//!
//! Configuration is resolved in three steps: the optional file (TOML, JSON
//! with comments, or YAML, chosen by extension), then [`CliOverrides`], then
//! [`validate_config`].

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config, load_or_default};
pub use types::*;
pub use validate::validate_config;
