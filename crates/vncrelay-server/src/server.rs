//! Server lifecycle: bind listeners, accept until shutdown, then drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vncrelay_config::Config;

use crate::error::ServerError;
use crate::listener::accept_loop;
use crate::registry::{CloseReport, SessionRegistry};
use crate::state::{ListenerContext, SessionSettings};
use crate::util::create_listener;

/// Idempotent shutdown request.
///
/// Wraps the token the server waits on; only the first [`trigger`](Self::trigger)
/// starts a shutdown, later ones are reported and ignored.
#[derive(Clone, Default)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to hand to [`Server::run`].
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Returns `false` if one is already in progress.
    pub fn trigger(&self) -> bool {
        if self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

struct BoundListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<ListenerContext>,
}

/// A set of bound listeners sharing one session registry.
pub struct Server {
    listeners: Vec<BoundListener>,
    registry: SessionRegistry,
    limit: Option<Arc<Semaphore>>,
    shutdown_grace: Duration,
}

impl Server {
    /// Bind every configured listener. Any bind failure aborts startup and
    /// releases the sockets bound so far.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let settings = Arc::new(SessionSettings::from_config(config));
        let registry = SessionRegistry::new();
        let backlog = config.limits.connection_backlog;

        let mut listeners = Vec::with_capacity(config.listeners.len());
        for (i, lc) in config.listeners.iter().enumerate() {
            let addr = lc.listen_addr().ok_or_else(|| {
                ServerError::Config(format!(
                    "listeners[{i}].listen {:?} is not a socket address",
                    lc.listen
                ))
            })?;
            let target = lc.target_endpoint()?;
            let name: Arc<str> = Arc::from(lc.display_name());

            let listener = create_listener(addr, backlog).map_err(|source| {
                error!(listener = %name, address = %addr, error = %source, "bind failed");
                ServerError::Bind { addr, source }
            })?;
            let local_addr = listener.local_addr()?;
            info!(
                listener = %name,
                address = %local_addr,
                upstream = %target,
                transport = %lc.transport,
                backlog,
                "listening"
            );

            listeners.push(BoundListener {
                listener,
                local_addr,
                ctx: Arc::new(ListenerContext {
                    name,
                    target,
                    transport: lc.transport,
                    websocket: lc.websocket.clone(),
                    settings: settings.clone(),
                    registry: registry.clone(),
                }),
            });
        }

        if listeners.is_empty() {
            return Err(ServerError::Config("no listeners configured".into()));
        }

        let limit = config.limits.max_sessions.map(|n| {
            info!("max_sessions set to {}", n);
            Arc::new(Semaphore::new(n))
        });

        Ok(Self {
            listeners,
            registry,
            limit,
            shutdown_grace: config.timeouts.shutdown_grace(),
        })
    }

    /// Actual bound addresses, in configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr).collect()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` is cancelled, then stop accepting
    /// on every listener, close all sessions within the grace period and
    /// release the listening sockets.
    pub async fn run(self, shutdown: CancellationToken) -> CloseReport {
        let stop = CancellationToken::new();
        let mut loops = Vec::with_capacity(self.listeners.len());
        for bound in self.listeners {
            loops.push(tokio::spawn(accept_loop(
                bound.listener,
                bound.ctx,
                self.limit.clone(),
                stop.clone(),
            )));
        }

        shutdown.cancelled().await;
        info!(
            sessions = self.registry.len(),
            "shutdown requested, stopping listeners"
        );
        stop.cancel();

        let mut released = Vec::with_capacity(loops.len());
        for handle in loops {
            match handle.await {
                Ok(listener) => released.push(listener),
                Err(err) => warn!(error = %err, "accept loop ended abnormally"),
            }
        }

        let report = self.registry.close_all(self.shutdown_grace).await;
        drop(released);
        info!(
            requested = report.requested,
            drained = report.drained,
            forced = report.forced,
            "server stopped"
        );
        report
    }
}

/// Bind and run the server until `shutdown` is cancelled.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
) -> Result<CloseReport, ServerError> {
    let server = Server::bind(&config).await?;
    Ok(server.run(shutdown).await)
}
