//! Registry of live sessions.
//!
//! Every accepted connection is registered before its task is spawned and
//! removed exactly once when the task's [`SessionGuard`] drops. Other actors
//! (shutdown, operators) can only *request* that a session close.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vncrelay_core::TargetEndpoint;
use vncrelay_core::io::Direction;
use vncrelay_metrics::{
    ERROR_FORCED_CLOSE, record_forced_closes, record_session_accepted, record_session_closed,
};

/// Upper bound on how long forcibly closed sessions get to unregister.
const FORCED_CLOSE_SETTLE: Duration = Duration::from_secs(5);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Relaying = 1,
    Closing = 2,
    Closed = 3,
    Failed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Relaying,
            2 => SessionState::Closing,
            3 => SessionState::Closed,
            _ => SessionState::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Relaying => "relaying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of one session. Owned by the registry and the session task.
pub struct SessionEntry {
    id: u64,
    peer: SocketAddr,
    listener: Arc<str>,
    target: RwLock<TargetEndpoint>,
    started: Instant,
    state: AtomicU8,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    close: CancellationToken,
    abort: CancellationToken,
}

impl SessionEntry {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn target(&self) -> TargetEndpoint {
        self.target.read().clone()
    }

    /// Replace the target chosen at accept time (per-request targets).
    pub fn set_target(&self, target: TargetEndpoint) {
        *self.target.write() = target;
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        let counter = match direction {
            Direction::ClientToUpstream => &self.bytes_up,
            Direction::UpstreamToClient => &self.bytes_down,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Cancelled when a graceful close is requested.
    pub fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Cancelled when a forced close is requested.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Ask the session to drain and close.
    pub fn request_close(&self) {
        self.close.cancel();
    }

    /// Make the session drop both connections now.
    pub fn force_close(&self) {
        self.close.cancel();
        self.abort.cancel();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            peer: self.peer,
            listener: self.listener.to_string(),
            target: self.target().to_string(),
            state: self.state(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            age: self.age(),
        }
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("listener", &self.listener)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a session's observable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: u64,
    pub peer: SocketAddr,
    pub listener: String,
    pub target: String,
    pub state: SessionState,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub age: Duration,
}

/// Outcome of [`SessionRegistry::close_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Sessions asked to close.
    pub requested: usize,
    /// Sessions that finished within the grace period.
    pub drained: usize,
    /// Sessions closed forcibly after the grace period.
    pub forced: usize,
}

struct Inner {
    sessions: RwLock<HashMap<u64, Arc<SessionEntry>>>,
    next_id: AtomicU64,
    empty: Notify,
    closing: AtomicBool,
}

/// Concurrency-safe map of session id to live session.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                empty: Notify::new(),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Insert a new session in the `Connecting` state.
    ///
    /// Ids are never reused. Once [`close_all`](Self::close_all) has started,
    /// new sessions are registered with a close already requested.
    pub fn register(
        &self,
        peer: SocketAddr,
        listener: Arc<str>,
        target: TargetEndpoint,
    ) -> SessionGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        record_session_accepted(&listener);
        let entry = Arc::new(SessionEntry {
            id,
            peer,
            listener,
            target: RwLock::new(target),
            started: Instant::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            close: CancellationToken::new(),
            abort: CancellationToken::new(),
        });
        if self.inner.closing.load(Ordering::Acquire) {
            entry.request_close();
        }
        self.inner.sessions.write().insert(id, entry.clone());
        SessionGuard {
            registry: self.clone(),
            entry,
        }
    }

    /// Remove a session. Unknown ids are a no-op; returns whether it was present.
    pub fn unregister(&self, id: u64) -> bool {
        let mut sessions = self.inner.sessions.write();
        let removed = sessions.remove(&id).is_some();
        let now_empty = sessions.is_empty();
        drop(sessions);
        if removed && now_empty {
            self.inner.empty.notify_waiters();
        }
        removed
    }

    pub fn get(&self, id: u64) -> Option<Arc<SessionEntry>> {
        self.inner.sessions.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.read().is_empty()
    }

    /// Snapshot of all registered sessions, ordered by id.
    pub fn list_active(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.entries().iter().map(|e| e.summary()).collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Ask one session to drain and close. Returns false for unknown ids.
    pub fn request_close(&self, id: u64) -> bool {
        match self.get(id) {
            Some(entry) => {
                entry.request_close();
                true
            }
            None => false,
        }
    }

    /// Wait until no session is registered, up to `timeout`.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.empty.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent unregister
            // cannot slip between the check and the wait.
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_empty();
            }
        }
    }

    /// Close every session.
    ///
    /// Requests a graceful close of all sessions, waits up to `grace` for
    /// them to finish, then forcibly closes the stragglers and waits for
    /// their teardown.
    pub async fn close_all(&self, grace: Duration) -> CloseReport {
        self.inner.closing.store(true, Ordering::Release);

        let entries = self.entries();
        let requested = entries.len();
        if requested == 0 {
            return CloseReport::default();
        }

        info!(
            sessions = requested,
            grace_secs = grace.as_secs_f64(),
            "requesting graceful close"
        );
        for entry in &entries {
            entry.request_close();
        }
        drop(entries);

        if self.wait_empty(grace).await {
            info!(sessions = requested, "all sessions drained");
            return CloseReport {
                requested,
                drained: requested,
                forced: 0,
            };
        }

        let stragglers = self.entries();
        let forced = stragglers.len();
        for entry in &stragglers {
            warn!(
                session = entry.id(),
                peer = %entry.peer(),
                listener = entry.listener(),
                state = %entry.state(),
                bytes_up = entry.bytes_up(),
                bytes_down = entry.bytes_down(),
                error_type = ERROR_FORCED_CLOSE,
                "session still open after grace period, forcing close"
            );
            entry.force_close();
        }
        drop(stragglers);
        record_forced_closes(forced as u64);

        if !self.wait_empty(FORCED_CLOSE_SETTLE).await {
            warn!(remaining = self.len(), "sessions did not unregister after forced close");
        }

        CloseReport {
            requested,
            drained: requested.saturating_sub(forced),
            forced,
        }
    }

    fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.inner.sessions.read().values().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

/// Guard that unregisters its session on drop.
pub struct SessionGuard {
    registry: SessionRegistry,
    entry: Arc<SessionEntry>,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn entry(&self) -> &Arc<SessionEntry> {
        &self.entry
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.unregister(self.entry.id) {
            record_session_closed(self.entry.age().as_secs_f64());
        }
    }
}
