//! Unified vless-rs CLI.
//!
//! This binary provides a unified interface to the vless components:
//! - `vless-rs server` - Run the tunnel server
//!
//! The server can also be run as a standalone binary.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// vless-rs unified CLI.
#[derive(Parser)]
#[command(
    name = "vless-rs",
    version,
    about = "A Rust implementation of the VLESS-over-WebSocket tunnel protocol",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server.
    #[command(name = "server", alias = "serve")]
    Server(Box<vless_server::cli::ServerArgs>),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server(args) => vless_server::cli::run(*args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
