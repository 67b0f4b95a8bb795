//! Server state shared across sessions.

use std::time::Duration;

use vless_proto::Credential;

use crate::config::WebSocketConfig;

/// Read-only state shared by all sessions.
///
/// The credential is parsed once at startup and injected here; sessions
/// never mutate any of this.
#[derive(Clone)]
pub struct ServerState {
    pub credential: Credential,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_header_bytes: usize,
    pub relay_buffer_size: usize,
    pub tcp_send_buffer: usize,
    pub tcp_recv_buffer: usize,
    pub websocket: WebSocketConfig,
}
