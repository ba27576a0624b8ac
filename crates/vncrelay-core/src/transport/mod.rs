//! Transport adapters that expose a plain byte stream to the relay.

#[cfg(feature = "ws")]
mod ws;

#[cfg(feature = "ws")]
pub use ws::WsIo;
