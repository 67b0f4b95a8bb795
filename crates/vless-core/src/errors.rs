//! Error label constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// WebSocket upgrade error.
pub const ERROR_WS_UPGRADE: &str = "ws_upgrade";
/// Handshake parsing/validation error.
pub const ERROR_PROTOCOL: &str = "protocol";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// Authentication error.
pub const ERROR_AUTH: &str = "auth";
/// Upstream connect error.
pub const ERROR_UPSTREAM: &str = "upstream_connect";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
