//! Accept loop for one listening socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use vncrelay_core::defaults::ACCEPT_ERROR_BACKOFF_MS;
use vncrelay_metrics::{ERROR_IO, record_error, record_session_rejected};

use crate::session::run_session;
use crate::state::ListenerContext;
use crate::util::apply_stream_options;

/// Accept connections until `stop` is cancelled, spawning one session task
/// per connection. Returns the listener so the caller decides when the
/// socket is released.
pub async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ListenerContext>,
    limit: Option<Arc<Semaphore>>,
    stop: CancellationToken,
) -> TcpListener {
    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => {
                debug!(listener = %ctx.name, "accept loop stopped");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        // Typically EMFILE/ENFILE; back off instead of spinning.
                        record_error(ERROR_IO);
                        warn!(listener = %ctx.name, error = %err, "accept failed");
                        tokio::select! {
                            _ = stop.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)) => {}
                        }
                        continue;
                    }
                };

                let permit: Option<OwnedSemaphorePermit> = match &limit {
                    Some(sem) => match sem.clone().try_acquire_owned() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            debug!(peer = %peer, reason = "max_sessions", "connection rejected");
                            record_session_rejected("max_sessions");
                            drop(tcp); // close immediately
                            continue;
                        }
                    },
                    None => None,
                };

                if let Err(err) = apply_stream_options(&tcp, &ctx.settings.tcp) {
                    debug!(peer = %peer, error = %err, "failed to set client socket options");
                }

                // Registered before the task starts so shutdown sees it.
                let guard = ctx.registry.register(peer, ctx.name.clone(), ctx.target.clone());
                let span = info_span!(
                    "session",
                    id = guard.id(),
                    peer = %peer,
                    listener = %ctx.name
                );
                debug!(parent: &span, "new connection");

                let ctx = ctx.clone();
                tokio::spawn(
                    async move {
                        let _permit = permit; // hold permit until session ends
                        run_session(ctx, tcp, guard).await;
                    }
                    .instrument(span),
                );
            }
        }
    }
    listener
}
