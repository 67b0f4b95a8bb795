//! Tunnel session handling.
//!
//! One task per accepted connection: read the upgrade header, complete the
//! WebSocket handshake on the tunnel path, feed exactly the first message to
//! the handshake parser, check the credential, connect upstream, ack, then
//! hand both endpoints to the relay. Frames that arrive once the session is
//! relaying are raw payload and are never re-parsed.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, trace, warn};
use vless_core::io::PrefixedStream;
use vless_metrics::{
    record_auth_failure, record_auth_success, record_connection_rejected,
    record_handshake_rejected, record_upstream_connect_duration, record_upstream_connect_failure,
};
use vless_proto::{ack, parse_handshake};

use crate::error::ServerError;
use crate::outbound::connect_upstream;
use crate::relay::relay_session;
use crate::state::ServerState;
use crate::ws::{
    accept_ws, inspect_upgrade, send_reject, UpgradeInspect, WsIo, INITIAL_BUFFER_SIZE,
};

/// Lifecycle of a tunnel session, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Connecting,
    Authenticating,
    Rejected,
    Resolving,
    ConnectingUpstream,
    Relaying,
    Closed,
}

impl SessionPhase {
    fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Connecting => "connecting",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Rejected => "rejected",
            SessionPhase::Resolving => "resolving",
            SessionPhase::ConnectingUpstream => "connecting_upstream",
            SessionPhase::Relaying => "relaying",
            SessionPhase::Closed => "closed",
        }
    }
}

fn enter(phase: &mut SessionPhase, next: SessionPhase, peer: SocketAddr) {
    *phase = next;
    trace!(peer = %peer, phase = next.as_str(), "session phase");
}

/// Handle a newly accepted connection.
///
/// Reads HTTP header bytes until the request can be classified: a WebSocket
/// upgrade on the tunnel path becomes a session, other HTTP requests get a
/// terse rejection, and non-HTTP bytes close silently. The handshake
/// deadline spans everything up to the parsed first message, so a silent
/// client cannot hold a slot forever.
pub async fn handle_conn<S>(
    mut stream: S,
    state: Arc<ServerState>,
    peer: SocketAddr,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let deadline = Instant::now() + state.handshake_timeout;
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
    loop {
        let n = match timeout_at(deadline, stream.read_buf(&mut buf)).await {
            Ok(res) => res?,
            Err(_) => {
                debug!(peer = %peer, "upgrade header not received in time");
                return Err(ServerError::HandshakeTimeout);
            }
        };
        if n == 0 {
            return Ok(());
        }

        match inspect_upgrade(&buf, &state.websocket) {
            UpgradeInspect::NeedMore => {
                if buf.len() > state.max_header_bytes {
                    warn!(peer = %peer, bytes = buf.len(), max = state.max_header_bytes, "upgrade header too large");
                    record_connection_rejected("header_too_large");
                    return send_reject(stream, "request too large").await;
                }
                continue;
            }
            UpgradeInspect::Upgrade => {
                let ws = match timeout_at(
                    deadline,
                    accept_ws(stream, buf.freeze(), &state.websocket),
                )
                .await
                {
                    Ok(res) => res?,
                    Err(_) => return Err(ServerError::HandshakeTimeout),
                };
                return handle_tunnel(ws, state, peer, deadline).await;
            }
            UpgradeInspect::Reject(reason) => {
                record_connection_rejected("not_tunnel");
                return send_reject(stream, reason).await;
            }
            UpgradeInspect::NotHttp => {
                debug!(peer = %peer, "non-http bytes on tunnel listener");
                record_connection_rejected("not_http");
                return Ok(());
            }
        }
    }
}

/// Drive one tunnel session over an upgraded WebSocket connection.
async fn handle_tunnel<S>(
    mut ws: WebSocketStream<PrefixedStream<S>>,
    state: Arc<ServerState>,
    peer: SocketAddr,
    deadline: Instant,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut phase = SessionPhase::Connecting;

    // Exactly one first message feeds the parser.
    let first = loop {
        let msg = match timeout_at(deadline, ws.next()).await {
            Err(_) => {
                debug!(peer = %peer, phase = phase.as_str(), "handshake not received in time");
                return Err(ServerError::HandshakeTimeout);
            }
            Ok(None) => return Ok(()),
            Ok(Some(Ok(m))) => m,
            Ok(Some(Err(e))) => return Err(ServerError::Io(std::io::Error::other(e))),
        };
        match msg {
            Message::Binary(data) => break data,
            Message::Text(text) => break text.into_bytes(),
            Message::Close(_) => return Ok(()),
            // Pongs for pings are queued by the protocol layer
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    };

    enter(&mut phase, SessionPhase::Authenticating, peer);
    let request = match parse_handshake(&first) {
        Ok(v) => v,
        Err(err) => {
            record_handshake_rejected();
            debug!(peer = %peer, phase = phase.as_str(), error = ?err, "malformed handshake");
            return Err(ServerError::Handshake(err));
        }
    };

    if !state.credential.matches(request.credential) {
        enter(&mut phase, SessionPhase::Rejected, peer);
        record_auth_failure();
        // Silent close: no response bytes, no hint of what mismatched
        debug!(peer = %peer, phase = phase.as_str(), "credential mismatch");
        return Ok(());
    }
    record_auth_success();

    enter(&mut phase, SessionPhase::Resolving, peer);
    let host = request.host.to_host_string();
    let port = request.port;

    enter(&mut phase, SessionPhase::ConnectingUpstream, peer);
    debug!(peer = %peer, host = %host, port, "connecting upstream");
    let connect_start = Instant::now();
    let mut upstream = match connect_upstream(
        &host,
        port,
        state.tcp_send_buffer,
        state.tcp_recv_buffer,
    )
    .await
    {
        Ok(v) => v,
        Err(err) => {
            record_upstream_connect_failure();
            // The ack was never written; the client sees only the close
            debug!(peer = %peer, phase = phase.as_str(), host = %host, port, error = %err, "upstream connect failed");
            return Err(ServerError::UpstreamConnect(err));
        }
    };
    record_upstream_connect_duration(connect_start.elapsed().as_secs_f64());

    // The ack must reach the client before any relayed payload
    let mut client = WsIo::new(ws);
    client.write_all(&ack(request.version)).await?;
    client.flush().await?;

    if !request.payload.is_empty() {
        upstream.write_all(request.payload).await?;
        debug!(peer = %peer, bytes = request.payload.len(), "initial payload sent");
    }

    enter(&mut phase, SessionPhase::Relaying, peer);
    relay_session(
        client,
        upstream,
        state.idle_timeout,
        state.relay_buffer_size,
    )
    .await?;
    enter(&mut phase, SessionPhase::Closed, peer);
    debug!(peer = %peer, "session finished");
    Ok(())
}
