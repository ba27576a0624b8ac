//! One relay session: handshake, upstream connect, relay, teardown.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vncrelay_config::Transport;
use vncrelay_core::io::{Direction, RelayMetrics, RelayOutcome, relay_bidirectional};
use vncrelay_metrics::{
    record_bytes, record_error, record_handshake_duration, record_upstream_connect_duration,
};

use crate::error::SessionError;
use crate::registry::{SessionEntry, SessionGuard, SessionState};
use crate::state::ListenerContext;
use crate::util::connect_upstream;
use crate::ws::{WsIo, accept_ws};

/// Feeds relay progress into the session counters and Prometheus.
struct SessionMetrics<'a> {
    entry: &'a SessionEntry,
}

impl RelayMetrics for SessionMetrics<'_> {
    #[inline]
    fn record_forwarded(&self, direction: Direction, bytes: u64) {
        self.entry.add_bytes(direction, bytes);
        record_bytes(direction.as_str(), bytes);
    }

    fn record_half_close(&self, direction: Direction) {
        debug!(%direction, "half-closed");
    }
}

/// Run a session to completion. Errors are logged here and never propagate.
///
/// The guard is dropped on return, which unregisters the session.
pub async fn run_session(ctx: Arc<ListenerContext>, stream: TcpStream, guard: SessionGuard) {
    let entry = guard.entry().clone();
    let result = drive(&ctx, stream, &entry).await;

    let reason = match &result {
        Ok(outcome) => outcome_label(*outcome),
        Err(err) => err.error_type(),
    };
    mark_closing(&entry, reason);

    if let Err(err) = &result {
        record_error(err.error_type());
    }
    match &result {
        Ok(RelayOutcome::Aborted) => {
            warn!(
                bytes_up = entry.bytes_up(),
                bytes_down = entry.bytes_down(),
                "session forcibly closed"
            );
        }
        Ok(_) => {}
        Err(SessionError::UpstreamUnreachable { target, source }) => {
            warn!(upstream = %target, error = %source, "upstream unreachable");
        }
        Err(SessionError::RelayIo(err)) => {
            warn!(
                direction = %err.direction,
                error = %err.source,
                bytes_up = entry.bytes_up(),
                bytes_down = entry.bytes_down(),
                "relay failed"
            );
        }
        Err(SessionError::Handshake(msg)) => {
            debug!(error = %msg, "websocket handshake failed");
        }
    }

    let state = if result.is_ok() {
        SessionState::Closed
    } else {
        SessionState::Failed
    };
    entry.set_state(state);
    info!(
        state = %state,
        reason,
        upstream = %entry.target(),
        bytes_up = entry.bytes_up(),
        bytes_down = entry.bytes_down(),
        duration_ms = entry.age().as_millis() as u64,
        "session closed"
    );
    drop(guard);
}

/// Enter `Closing` once; later calls are no-ops.
fn mark_closing(entry: &SessionEntry, reason: &'static str) {
    if entry.state() != SessionState::Closing {
        entry.set_state(SessionState::Closing);
        debug!(reason, "session closing");
    }
}

/// Reason logged when a close request arrives while the session is running.
fn close_request_reason(entry: &SessionEntry) -> &'static str {
    if entry.abort_token().is_cancelled() {
        outcome_label(RelayOutcome::Aborted)
    } else {
        outcome_label(RelayOutcome::Drained)
    }
}

fn outcome_label(outcome: RelayOutcome) -> &'static str {
    match outcome {
        RelayOutcome::Completed => "eof",
        RelayOutcome::IdleTimeout => "idle_timeout",
        RelayOutcome::Drained => "shutdown",
        RelayOutcome::Aborted => "forced_close",
    }
}

async fn drive(
    ctx: &ListenerContext,
    stream: TcpStream,
    entry: &SessionEntry,
) -> Result<RelayOutcome, SessionError> {
    match ctx.transport {
        Transport::Tcp => connect_and_relay(ctx, entry, stream).await,
        Transport::Websocket => {
            let started = Instant::now();
            let handshake = tokio::time::timeout(
                ctx.settings.handshake_timeout,
                accept_ws(stream, &ctx.websocket, &ctx.target),
            );
            let (ws, target) = match until_cancelled(entry, handshake).await {
                Err(outcome) => return Ok(outcome),
                Ok(Err(_elapsed)) => {
                    return Err(SessionError::Handshake(format!(
                        "timed out after {}s",
                        ctx.settings.handshake_timeout.as_secs()
                    )));
                }
                Ok(Ok(upgraded)) => upgraded?,
            };
            record_handshake_duration(started.elapsed().as_secs_f64());
            if target != ctx.target {
                debug!(upstream = %target, "target selected by client");
                entry.set_target(target);
            }
            connect_and_relay(ctx, entry, WsIo::new(ws)).await
        }
    }
}

async fn connect_and_relay<C>(
    ctx: &ListenerContext,
    entry: &SessionEntry,
    client: C,
) -> Result<RelayOutcome, SessionError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let target = entry.target();
    let started = Instant::now();
    let connect = tokio::time::timeout(
        ctx.settings.connect_timeout,
        connect_upstream(&target, &ctx.settings.tcp),
    );
    let upstream = match until_cancelled(entry, connect).await {
        Err(outcome) => return Ok(outcome),
        Ok(Err(_elapsed)) => {
            return Err(SessionError::UpstreamUnreachable {
                target: target.to_string(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connect timed out after {}s",
                        ctx.settings.connect_timeout.as_secs()
                    ),
                ),
            });
        }
        Ok(Ok(Err(source))) => {
            return Err(SessionError::UpstreamUnreachable {
                target: target.to_string(),
                source,
            });
        }
        Ok(Ok(Ok(stream))) => stream,
    };
    let connect_secs = started.elapsed().as_secs_f64();
    record_upstream_connect_duration(connect_secs);

    entry.set_state(SessionState::Relaying);
    info!(
        upstream = %target,
        connect_ms = (connect_secs * 1000.0) as u64,
        "session connected"
    );

    let metrics = SessionMetrics { entry };
    let relay = relay_bidirectional(
        client,
        upstream,
        &ctx.settings.relay,
        &metrics,
        entry.close_token(),
        entry.abort_token(),
    );
    tokio::pin!(relay);

    // The relay drains or aborts by itself; this only tracks the state.
    let outcome = tokio::select! {
        biased;
        result = &mut relay => result?,
        _ = entry.close_token().cancelled() => {
            mark_closing(entry, close_request_reason(entry));
            relay.await?
        }
    };
    Ok(outcome)
}

/// Race `fut` against the session's close and abort requests.
///
/// Nothing has been relayed yet while connecting, so a graceful close is
/// reported as [`RelayOutcome::Drained`].
async fn until_cancelled<F: Future>(
    entry: &SessionEntry,
    fut: F,
) -> Result<F::Output, RelayOutcome> {
    let outcome = tokio::select! {
        biased;
        _ = entry.abort_token().cancelled() => RelayOutcome::Aborted,
        _ = entry.close_token().cancelled() => RelayOutcome::Drained,
        out = fut => return Ok(out),
    };
    mark_closing(entry, outcome_label(outcome));
    Err(outcome)
}
