//! vncrelay server library.
//!
//! Exposes the listener, session registry and lifecycle so integration tests
//! and embedding binaries can run the relay in-process.

pub mod cli;
mod error;
mod listener;
mod registry;
mod server;
mod session;
mod state;
mod util;
mod ws;

pub use cli::{ServerArgs, init_tracing};
pub use error::{ServerError, SessionError};
pub use registry::{
    CloseReport, SessionEntry, SessionGuard, SessionRegistry, SessionState, SessionSummary,
};
pub use server::{Server, ShutdownTrigger, run_with_shutdown};
pub use tokio_util::sync::CancellationToken;
pub use ws::{QueryTargetError, target_from_query};
