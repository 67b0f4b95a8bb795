//! Relay wrapper with server metrics.
//!
//! This wraps the generic relay from `vless-core` with the server's metrics
//! facade.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use vless_core::io::{relay_bidirectional, RelayMetrics};
use vless_metrics::{record_client_to_upstream_bytes, record_upstream_to_client_bytes};

use crate::error::ServerError;

struct SessionMetrics;

impl RelayMetrics for SessionMetrics {
    #[inline]
    fn record_client_to_upstream(&self, bytes: u64) {
        record_client_to_upstream_bytes(bytes);
    }
    #[inline]
    fn record_upstream_to_client(&self, bytes: u64) {
        record_upstream_to_client_bytes(bytes);
    }
}

/// Relay a session's two endpoints until either side ends.
pub async fn relay_session<A, B>(
    client: A,
    upstream: B,
    idle_timeout: Duration,
    buffer_size: usize,
) -> Result<(), ServerError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    relay_bidirectional(client, upstream, idle_timeout, buffer_size, &SessionMetrics)
        .await
        .map_err(ServerError::from)
}
