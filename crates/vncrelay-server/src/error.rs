//! Server error types.

use std::io;
use std::net::SocketAddr;

use vncrelay_core::EndpointError;
use vncrelay_core::io::RelayIoError;
use vncrelay_metrics::{
    ERROR_BIND, ERROR_CONFIG, ERROR_HANDSHAKE, ERROR_INVALID_ENDPOINT, ERROR_IO, ERROR_RELAY_IO,
    ERROR_UPSTREAM_UNREACHABLE,
};

/// Startup and lifecycle errors. These end the process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Bind { .. } => ERROR_BIND,
            ServerError::Config(_) => ERROR_CONFIG,
            ServerError::InvalidEndpoint(_) => ERROR_INVALID_ENDPOINT,
            ServerError::Io(_) => ERROR_IO,
        }
    }
}

/// Errors that end a single session. They never leave the session task.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("upstream {target} unreachable: {source}")]
    UpstreamUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    RelayIo(#[from] RelayIoError),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

impl SessionError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SessionError::UpstreamUnreachable { .. } => ERROR_UPSTREAM_UNREACHABLE,
            SessionError::RelayIo(_) => ERROR_RELAY_IO,
            SessionError::Handshake(_) => ERROR_HANDSHAKE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vncrelay_core::TargetEndpoint;
    use vncrelay_core::io::Direction;

    #[test]
    fn error_labels() {
        let bind = ServerError::Bind {
            addr: "127.0.0.1:6080".parse().unwrap(),
            source: io::ErrorKind::AddrInUse.into(),
        };
        assert_eq!(bind.error_type(), "bind");
        assert!(bind.to_string().contains("127.0.0.1:6080"));

        let endpoint: ServerError = TargetEndpoint::parse("nope").unwrap_err().into();
        assert_eq!(endpoint.error_type(), "invalid_endpoint");

        let relay: SessionError = RelayIoError {
            direction: Direction::UpstreamToClient,
            source: io::ErrorKind::BrokenPipe.into(),
        }
        .into();
        assert_eq!(relay.error_type(), "relay_io");
        assert!(relay.to_string().contains("upstream_to_client"));
    }
}
