//! Configuration validation logic.

use std::collections::HashSet;

use crate::Config;
use crate::defaults::{max_relay_buffer_size, min_relay_buffer_size};
use crate::loader::ConfigError;
use crate::types::{Transport, parse_listen_addr};

const LOG_FORMATS: [&str; 3] = ["json", "pretty", "compact"];
const LOG_OUTPUTS: [&str; 2] = ["stdout", "stderr"];

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.listeners.is_empty() {
        return Err(ConfigError::Validation(
            "no listeners configured (add [[listeners]] or pass --listen and --target)".into(),
        ));
    }

    let mut names = HashSet::new();
    for (i, listener) in config.listeners.iter().enumerate() {
        if parse_listen_addr(&listener.listen).is_none() {
            return Err(ConfigError::Validation(format!(
                "listeners[{i}].listen {:?} is not a socket address",
                listener.listen
            )));
        }
        listener
            .target_endpoint()
            .map_err(|source| ConfigError::Endpoint {
                field: format!("listeners[{i}].target"),
                source,
            })?;
        if let Some(name) = &listener.name {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "listeners[{i}].name is empty"
                )));
            }
            if !names.insert(name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "listeners[{i}].name {name:?} is used more than once"
                )));
            }
        }
        if listener.transport == Transport::Websocket {
            if !listener.websocket.path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "listeners[{i}].websocket.path must start with '/'"
                )));
            }
            if listener.websocket.max_frame_bytes == 0 {
                return Err(ConfigError::Validation(format!(
                    "listeners[{i}].websocket.max_frame_bytes must be > 0"
                )));
            }
        }
    }

    if config.timeouts.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeouts.connect_timeout_secs must be > 0".into(),
        ));
    }
    if config.timeouts.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeouts.handshake_timeout_secs must be > 0".into(),
        ));
    }

    let limits = &config.limits;
    if limits.relay_buffer_size < min_relay_buffer_size() {
        return Err(ConfigError::Validation(format!(
            "limits.relay_buffer_size must be >= {}",
            min_relay_buffer_size()
        )));
    }
    if limits.relay_buffer_size > max_relay_buffer_size() {
        return Err(ConfigError::Validation(
            "limits.relay_buffer_size must be <= 1MB".into(),
        ));
    }
    if limits.connection_backlog == 0 {
        return Err(ConfigError::Validation(
            "limits.connection_backlog must be > 0".into(),
        ));
    }
    if limits.max_sessions == Some(0) {
        return Err(ConfigError::Validation(
            "limits.max_sessions must be > 0 (omit it for unlimited)".into(),
        ));
    }

    if let Some(listen) = &config.metrics.listen
        && parse_listen_addr(listen).is_none()
    {
        return Err(ConfigError::Validation(format!(
            "metrics.listen {listen:?} is not a socket address"
        )));
    }

    if let Some(format) = &config.logging.format
        && !LOG_FORMATS.contains(&format.as_str())
    {
        return Err(ConfigError::Validation(format!(
            "logging.format must be one of: {:?}",
            LOG_FORMATS
        )));
    }
    if let Some(output) = &config.logging.output
        && !LOG_OUTPUTS.contains(&output.as_str())
    {
        return Err(ConfigError::Validation(format!(
            "logging.output must be one of: {:?}",
            LOG_OUTPUTS
        )));
    }
    Ok(())
}
