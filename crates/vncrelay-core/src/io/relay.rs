//! Bidirectional byte relay with half-close, drain and abort handling.
//!
//! Each direction is driven as an independent poll-based state machine within
//! a single future, so back-pressure on one direction never stalls the other.
//! A direction only reads again once the previous chunk has been written and
//! flushed, which bounds buffering to one chunk per direction.
//!
//! End-of-stream on one source shuts down the write side of the opposite
//! connection and leaves the other direction running until it also reaches
//! end-of-stream. Any read or write error ends both directions at once,
//! except a write refused by a peer that already ended its own stream: that
//! peer has simply gone away, so the direction towards it is finished.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

use crate::defaults::DEFAULT_RELAY_BUFFER_SIZE;

/// One of the two byte-pumping directions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer for relay progress.
///
/// Implementors typically keep per-session byte counters and forward to the
/// process-wide metrics recorder.
pub trait RelayMetrics {
    /// `bytes` were written and flushed to the destination of `direction`.
    fn record_forwarded(&self, direction: Direction, bytes: u64);

    /// The source of `direction` reached end-of-stream (or a drain was
    /// requested) and the destination was shut down for writing.
    fn record_half_close(&self, _direction: Direction) {}
}

/// No-op metrics implementation for cases where metrics aren't needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl RelayMetrics for NoOpMetrics {
    #[inline]
    fn record_forwarded(&self, _direction: Direction, _bytes: u64) {}
}

/// A read or write failed mid-stream.
#[derive(Debug, thiserror::Error)]
#[error("relay {direction} failed: {source}")]
pub struct RelayIoError {
    pub direction: Direction,
    #[source]
    pub source: io::Error,
}

/// Tuning knobs for one relay.
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Size of each direction's chunk buffer.
    pub buffer_size: usize,
    /// Close the relay when neither direction moved data for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

/// How a relay that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Both directions reached end-of-stream.
    Completed,
    /// No data moved for the configured idle timeout.
    IdleTimeout,
    /// A graceful close was requested and both directions finished draining.
    Drained,
    /// A forced close was requested; in-flight data was discarded.
    Aborted,
}

/// State machine for one-directional copy with flush.
enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),       // bytes flushing
    ShuttingDown,
    Done,
}

/// Result of polling one copy direction.
enum CopyPoll {
    /// Data was flushed; contains byte count for metrics.
    Flushed(usize),
    /// Direction finished (EOF or drain, then shutdown).
    Finished,
}

/// Errors by which a destination reports that it is no longer there.
fn is_peer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Poll-driven one-directional copy: read → write → flush.
///
/// With `draining` set, a direction that is between chunks stops reading and
/// shuts its destination down; a chunk already read is still written first.
///
/// `source_eof` is set once the source reaches end-of-stream. `dest_eof` says
/// the destination already ended its own stream; a write it then refuses
/// finishes the direction instead of failing it.
#[allow(clippy::too_many_arguments)]
fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
    draining: bool,
    source_eof: &mut bool,
    dest_eof: bool,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                if draining {
                    *state = CopyState::ShuttingDown;
                    continue;
                }
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *source_eof = true;
                            *state = CopyState::ShuttingDown;
                        } else {
                            *state = CopyState::Writing(0, n);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    }
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            let total = *len;
                            *state = CopyState::Flushing(total);
                        }
                    }
                    Poll::Ready(Err(e)) if dest_eof && is_peer_gone(&e) => {
                        *state = CopyState::Done;
                        return Poll::Ready(Ok(CopyPoll::Finished));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) if dest_eof && is_peer_gone(&e) => {
                        *state = CopyState::Done;
                        return Poll::Ready(Ok(CopyPoll::Finished));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            // A peer that already went away cannot be half-closed; that is
            // not a relay failure.
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(CopyPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Relay bytes between `client` and `upstream` until both sides finish.
///
/// * `close` requests a graceful end: each direction finishes the chunk it is
///   writing, then shuts its destination down. The relay returns
///   [`RelayOutcome::Drained`] once both directions are done.
/// * `abort` ends the relay immediately with [`RelayOutcome::Aborted`]. Both
///   connections are dropped by the caller, which interrupts any pending I/O.
///
/// Returns the failing direction on the first read or write error.
pub async fn relay_bidirectional<A, B, M>(
    client: A,
    upstream: B,
    options: &RelayOptions,
    metrics: &M,
    close: &CancellationToken,
    abort: &CancellationToken,
) -> Result<RelayOutcome, RelayIoError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    M: RelayMetrics + ?Sized,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

    let buffer_size = options.buffer_size.max(1);
    let mut buf_up = vec![0u8; buffer_size];
    let mut buf_down = vec![0u8; buffer_size];
    let mut state_up = CopyState::Reading;
    let mut state_down = CopyState::Reading;

    let idle_timeout = options.idle_timeout;
    let idle_sleep = tokio::time::sleep(idle_timeout.unwrap_or_default());
    tokio::pin!(idle_sleep);

    let mut up_done = false;
    let mut down_done = false;
    let mut draining = false;
    let mut client_eof = false;
    let mut upstream_eof = false;

    loop {
        if up_done && down_done {
            return Ok(if draining {
                RelayOutcome::Drained
            } else {
                RelayOutcome::Completed
            });
        }

        let drain_now = draining;

        // Each direction registers its own waker so either can make progress
        // independently; one blocked write cannot stall the other direction.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut activity = false;

            if !up_done {
                match poll_copy_direction(
                    cx,
                    &mut client_r,
                    &mut upstream_w,
                    &mut buf_up,
                    &mut state_up,
                    drain_now,
                    &mut client_eof,
                    upstream_eof,
                ) {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        metrics.record_forwarded(Direction::ClientToUpstream, n as u64);
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        up_done = true;
                        metrics.record_half_close(Direction::ClientToUpstream);
                        any_ready = true;
                    }
                    Poll::Ready(Err(source)) => {
                        return Poll::Ready(Err(RelayIoError {
                            direction: Direction::ClientToUpstream,
                            source,
                        }));
                    }
                    Poll::Pending => {}
                }
            }

            if !down_done {
                match poll_copy_direction(
                    cx,
                    &mut upstream_r,
                    &mut client_w,
                    &mut buf_down,
                    &mut state_down,
                    drain_now,
                    &mut upstream_eof,
                    client_eof,
                ) {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        metrics.record_forwarded(Direction::UpstreamToClient, n as u64);
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        down_done = true;
                        metrics.record_half_close(Direction::UpstreamToClient);
                        any_ready = true;
                    }
                    Poll::Ready(Err(source)) => {
                        return Poll::Ready(Err(RelayIoError {
                            direction: Direction::UpstreamToClient,
                            source,
                        }));
                    }
                    Poll::Pending => {}
                }
            }

            if any_ready {
                Poll::Ready(Ok(activity))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            biased;

            _ = abort.cancelled() => {
                return Ok(RelayOutcome::Aborted);
            }
            _ = close.cancelled(), if !draining => {
                draining = true;
            }
            result = both => {
                let activity = result?;
                if activity && let Some(timeout) = idle_timeout {
                    idle_sleep.as_mut().reset(TokioInstant::now() + timeout);
                }
            }
            _ = &mut idle_sleep, if idle_timeout.is_some() => {
                return Ok(RelayOutcome::IdleTimeout);
            }
        }
    }
}
