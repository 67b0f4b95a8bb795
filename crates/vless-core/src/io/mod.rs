//! I/O building blocks: stream adapters and the bidirectional relay.

mod prefixed;
mod relay;

pub use prefixed::PrefixedStream;
pub use relay::{relay_bidirectional, NoOpMetrics, RelayMetrics};
