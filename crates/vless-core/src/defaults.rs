//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default relay idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
/// Default handshake-read timeout in seconds. Covers the upgrade header and
/// the first tunnel message; a silent client is cut off rather than holding
/// a session slot indefinitely.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default maximum bytes of HTTP headers accepted during the upgrade.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;
/// Default relay buffer size (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default TCP socket send buffer size (0 = OS default).
pub const DEFAULT_TCP_SEND_BUFFER: usize = 0;
/// Default TCP socket receive buffer size (0 = OS default).
pub const DEFAULT_TCP_RECV_BUFFER: usize = 0;

// ============================================================================
// Connection Defaults
// ============================================================================

/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;

// ============================================================================
// WebSocket Defaults
// ============================================================================

/// Default tunnel path marker. Upgrade requests on any other path are
/// rejected.
pub const DEFAULT_WS_PATH: &str = "/";
/// Default max WebSocket frame size (0 = unlimited).
pub const DEFAULT_WS_MAX_FRAME_BYTES: usize = 1 << 20;
