//! I/O primitives for relaying bytes between a client and an upstream.

mod relay;

pub use relay::{
    Direction, NoOpMetrics, RelayIoError, RelayMetrics, RelayOptions, RelayOutcome,
    relay_bidirectional,
};
