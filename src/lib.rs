//! # vless-rs
//!
//! A Rust implementation of the VLESS-over-WebSocket tunnel protocol.
//!
//! A compact binary handshake authenticates each client by a fixed 16-byte
//! credential and names a destination; the server then relays bytes
//! bidirectionally between the WebSocket client and that destination.
//!
//! ## Crates
//!
//! - [`vless_proto`] - Handshake parsing and serialization
//! - [`vless_core`] - Relay, stream adapters, and default configurations
//! - [`vless_metrics`] - Prometheus-compatible metrics
//! - [`vless_server`] - Server implementation

pub use vless_core as core;
pub use vless_metrics as metrics;
pub use vless_proto as proto;
pub use vless_server as server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use vless_proto::{parse_handshake, Credential, Handshake, HostRef};
    pub use vless_server::{
        load_config, run, run_with_shutdown, validate_config, CancellationToken, Config,
        ServerError,
    };
}
