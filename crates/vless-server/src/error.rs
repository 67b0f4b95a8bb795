//! Server error types.
//!
//! Credential mismatch is deliberately absent: authentication failure is
//! recovered locally (silent close, counter, debug log) and never surfaces
//! as an error.

use vless_core::errors::{ERROR_CONFIG, ERROR_IO, ERROR_PROTOCOL, ERROR_TIMEOUT, ERROR_UPSTREAM};
use vless_proto::ParseError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("handshake: {0:?}")]
    Handshake(ParseError),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("upstream connect: {0}")]
    UpstreamConnect(std::io::Error),
}

impl ServerError {
    /// Get the error label for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Io(_) => ERROR_IO,
            ServerError::Config(_) => ERROR_CONFIG,
            ServerError::Handshake(_) => ERROR_PROTOCOL,
            ServerError::HandshakeTimeout => ERROR_TIMEOUT,
            ServerError::UpstreamConnect(_) => ERROR_UPSTREAM,
        }
    }
}
