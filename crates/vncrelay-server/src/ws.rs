//! WebSocket upgrade handling for browser VNC clients.
//!
//! The upgrade request is checked against the listener's path, the `binary`
//! subprotocol is echoed when offered, and (if enabled) the target is taken
//! from the `host`/`ip` and `port` query parameters. The `WsIo` adapter that
//! turns the upgraded stream into bytes lives in `vncrelay-core::transport`.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async_with_config,
    tungstenite::{
        Error as WsError,
        handshake::server::{ErrorResponse, Request, Response},
        http::{HeaderValue, StatusCode, header::SEC_WEBSOCKET_PROTOCOL},
        protocol::WebSocketConfig,
    },
};
use tracing::debug;
use vncrelay_config::WebSocketConfig as WsCfg;
use vncrelay_core::{TargetEndpoint, WS_BINARY_SUBPROTOCOL, endpoint::parse_port_str};

use crate::error::SessionError;

pub use vncrelay_core::transport::WsIo;

/// Why a query-selected target was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryTargetError {
    #[error("invalid port {0:?} in query")]
    Port(String),
    #[error("invalid host {0:?} in query")]
    Host(String),
}

/// Accept a WebSocket upgrade and decide which target the session uses.
///
/// Rejections are answered with an HTTP error status before the error is
/// returned: 404 for a path mismatch, 400 for a malformed query target.
pub async fn accept_ws<S>(
    stream: S,
    cfg: &WsCfg,
    default_target: &TargetEndpoint,
) -> Result<(WebSocketStream<S>, TargetEndpoint), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_frame = if cfg.max_frame_bytes == 0 {
        None
    } else {
        Some(cfg.max_frame_bytes)
    };
    let ws_cfg = WebSocketConfig {
        max_frame_size: max_frame,
        max_message_size: max_frame,
        ..WebSocketConfig::default()
    };

    let mut selected: Option<TargetEndpoint> = None;
    let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        if path != cfg.path {
            debug!(path, expected = %cfg.path, "websocket path mismatch");
            return Err(error_response(StatusCode::NOT_FOUND, "not found"));
        }

        let target = if cfg.allow_target_query {
            target_from_query(req.uri().query(), default_target).map_err(|err| {
                debug!(error = %err, "websocket target query rejected");
                error_response(StatusCode::BAD_REQUEST, &err.to_string())
            })?
        } else {
            default_target.clone()
        };

        if offers_binary(req) {
            resp.headers_mut().insert(
                SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_static(WS_BINARY_SUBPROTOCOL),
            );
        }
        debug!(path, upstream = %target, "websocket upgrade");
        selected = Some(target);
        Ok(resp)
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_cfg))
        .await
        .map_err(|err| match err {
            WsError::Http(resp) => {
                SessionError::Handshake(format!("upgrade rejected with {}", resp.status()))
            }
            other => SessionError::Handshake(other.to_string()),
        })?;

    let target = selected.unwrap_or_else(|| default_target.clone());
    Ok((ws, target))
}

fn error_response(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = status;
    resp
}

fn offers_binary(req: &Request) -> bool {
    req.headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim().eq_ignore_ascii_case(WS_BINARY_SUBPROTOCOL))
}

/// Pick the target from `host` (or `ip`) and `port` query parameters.
///
/// Missing parameters keep the corresponding part of `default`.
pub fn target_from_query(
    query: Option<&str>,
    default: &TargetEndpoint,
) -> Result<TargetEndpoint, QueryTargetError> {
    let mut host: Option<String> = None;
    let mut ip: Option<String> = None;
    let mut port: Option<String> = None;

    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode(value);
        match key {
            "host" => host = Some(value),
            "ip" => ip = Some(value),
            "port" => port = Some(value),
            _ => {}
        }
    }

    let mut target = default.clone();
    if let Some(h) = host.or(ip) {
        let bare = h
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(&h);
        target = target
            .with_host(bare)
            .map_err(|_| QueryTargetError::Host(h.clone()))?;
    }
    if let Some(p) = port {
        let parsed = parse_port_str(&p).ok_or_else(|| QueryTargetError::Port(p.clone()))?;
        target = target
            .with_port(parsed)
            .map_err(|_| QueryTargetError::Port(p))?;
    }
    Ok(target)
}

/// Decode `%XX` escapes and `+`; invalid escapes are kept verbatim.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
