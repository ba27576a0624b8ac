//! Target endpoint parsing.
//!
//! A [`TargetEndpoint`] is the `host:port` pair a relay session connects to.
//! Parsing is purely syntactic: host names are kept as-is and only resolved
//! when the session connects, so a DNS failure is an upstream failure of that
//! session rather than a configuration error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reasons a `host:port` string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint {input:?}: missing ':' port separator")]
    MissingSeparator { input: String },
    #[error("invalid endpoint {input:?}: empty host")]
    EmptyHost { input: String },
    #[error("invalid endpoint {input:?}: port is not a number")]
    NonNumericPort { input: String },
    #[error("invalid endpoint {input:?}: port must be 1..=65535")]
    PortOutOfRange { input: String },
    #[error("invalid endpoint {input:?}: IPv6 hosts must be bracketed, e.g. [::1]:5900")]
    UnbracketedIpv6 { input: String },
}

/// A validated upstream address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetEndpoint {
    host: String,
    port: u16,
}

impl TargetEndpoint {
    /// Build an endpoint from already separated parts.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, EndpointError> {
        let host = host.into();
        let input = format!("{host}:{port}");
        if host.is_empty() {
            return Err(EndpointError::EmptyHost { input });
        }
        if port == 0 {
            return Err(EndpointError::PortOutOfRange { input });
        }
        Ok(Self { host, port })
    }

    /// Parse `host:port`, `[v6]:port` or `ip:port`.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let err_input = || input.to_string();
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingSeparator { input: err_input() })?;

        let host = match host.strip_prefix('[') {
            Some(rest) => rest
                .strip_suffix(']')
                .ok_or_else(|| EndpointError::UnbracketedIpv6 { input: err_input() })?,
            None if host.contains(':') => {
                return Err(EndpointError::UnbracketedIpv6 { input: err_input() });
            }
            None => host,
        };
        if host.is_empty() {
            return Err(EndpointError::EmptyHost { input: err_input() });
        }

        let port = parse_port(port).map_err(|kind| match kind {
            PortError::NotNumeric => EndpointError::NonNumericPort { input: err_input() },
            PortError::OutOfRange => EndpointError::PortOutOfRange { input: err_input() },
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same endpoint with a different host.
    pub fn with_host(&self, host: impl Into<String>) -> Result<Self, EndpointError> {
        Self::new(host, self.port)
    }

    /// Same endpoint with a different port.
    pub fn with_port(&self, port: u16) -> Result<Self, EndpointError> {
        Self::new(self.host.clone(), port)
    }
}

enum PortError {
    NotNumeric,
    OutOfRange,
}

/// Digits only: `u16::from_str` would also accept a leading `+`.
fn parse_port(s: &str) -> Result<u16, PortError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PortError::NotNumeric);
    }
    match s.parse::<u32>() {
        Ok(p) if (1..=u16::MAX as u32).contains(&p) => Ok(p as u16),
        _ => Err(PortError::OutOfRange),
    }
}

/// Parse a standalone port value (e.g. from a URL query).
pub fn parse_port_str(s: &str) -> Option<u16> {
    parse_port(s).ok()
}

impl FromStr for TargetEndpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Serialize for TargetEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TargetEndpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
