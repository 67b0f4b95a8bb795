//! Core plumbing shared across vless crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error label constants for metrics/logging
//! - The bidirectional relay and stream adapters

pub mod defaults;
pub mod errors;
pub mod io;
pub mod transport;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "vless-rs";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
