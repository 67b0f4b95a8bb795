//! VLESS tunnel server library.
//!
//! This module exposes the server implementation for use by integration
//! tests and potential embedding scenarios.

pub mod cli;
pub mod config;
mod error;
mod handler;
mod outbound;
mod relay;
mod server;
mod state;
mod util;
mod ws;

pub use config::{apply_overrides, load_config, validate_config, CliOverrides, Config};
pub use error::ServerError;
pub use server::{run, run_with_shutdown, DEFAULT_SHUTDOWN_TIMEOUT};
pub use tokio_util::sync::CancellationToken;
