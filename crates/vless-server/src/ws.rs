//! WebSocket upgrade handling.
//!
//! The listener distinguishes tunnel traffic from everything else by a
//! fixed path marker on the upgrade request. The `WsIo` adapter is provided
//! by `vless-core::transport`.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::WebSocketConfig,
    },
    WebSocketStream,
};
use tracing::{debug, warn};
use vless_core::io::PrefixedStream;

use crate::config::WebSocketConfig as WsCfg;
use crate::error::ServerError;

// Re-export WsIo from vless-core for convenience
pub use vless_core::transport::WsIo;

/// Initial buffer size for reading HTTP headers during the upgrade.
pub const INITIAL_BUFFER_SIZE: usize = 2048;

const HTTP_HEADER_END: &[u8] = b"\r\n\r\n";

/// Result of inspecting buffered bytes for a tunnel upgrade.
pub enum UpgradeInspect {
    /// Need more data to see the full header.
    NeedMore,
    /// Not HTTP traffic at all; close without a response.
    NotHttp,
    /// Valid WebSocket upgrade request on the tunnel path.
    Upgrade,
    /// Reject with reason (non-upgrade request, path/host mismatch).
    Reject(&'static str),
}

/// Inspect buffered bytes for a WebSocket upgrade on the tunnel path.
pub fn inspect_upgrade(buf: &[u8], cfg: &WsCfg) -> UpgradeInspect {
    let header_end = match find_header_end(buf) {
        Some(v) => v,
        None => return UpgradeInspect::NeedMore,
    };
    let header_str = match std::str::from_utf8(&buf[..header_end]) {
        Ok(v) => v,
        Err(_) => return UpgradeInspect::NotHttp,
    };
    let mut lines = header_str.split("\r\n");
    let request_line = match lines.next() {
        Some(v) => v,
        None => return UpgradeInspect::NotHttp,
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return UpgradeInspect::NotHttp;
    }
    if method != "GET" {
        return UpgradeInspect::Reject("websocket upgrade required");
    }

    let mut upgrade = false;
    let mut connection_upgrade = false;
    let mut ws_key = false;
    let mut host: Option<&str> = None;

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value_trim = value.trim();
            let value_lower = value_trim.to_ascii_lowercase();
            match name.as_str() {
                "upgrade" => {
                    if value_lower.contains("websocket") {
                        upgrade = true;
                    }
                }
                "connection" => {
                    if value_lower.contains("upgrade") {
                        connection_upgrade = true;
                    }
                }
                "sec-websocket-key" => {
                    if !value_trim.is_empty() {
                        ws_key = true;
                    }
                }
                "host" => {
                    host = Some(value_trim);
                }
                _ => {}
            }
        }
    }

    if !upgrade || !connection_upgrade || !ws_key {
        return UpgradeInspect::Reject("websocket upgrade required");
    }

    if !path_matches(cfg, path) || !host_matches(cfg, host) {
        return UpgradeInspect::Reject("tunnel path/host mismatch");
    }

    UpgradeInspect::Upgrade
}

/// Accept a WebSocket upgrade on the given stream, replaying the
/// already-read header bytes.
pub async fn accept_ws<S>(
    stream: S,
    initial: Bytes,
    cfg: &WsCfg,
) -> Result<WebSocketStream<PrefixedStream<S>>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let max_frame = if cfg.max_frame_bytes == 0 {
        None
    } else {
        Some(cfg.max_frame_bytes)
    };
    let ws_cfg = WebSocketConfig {
        max_frame_size: max_frame,
        max_message_size: max_frame,
        ..WebSocketConfig::default()
    };
    let prefixed = PrefixedStream::new(initial, stream);
    let ws = accept_hdr_async_with_config(
        prefixed,
        |req: &Request, resp: Response| {
            debug!(path = %req.uri().path(), "websocket upgrade");
            Ok(resp)
        },
        Some(ws_cfg),
    )
    .await
    .map_err(|e| {
        ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("websocket handshake failed: {e}"),
        ))
    })?;
    Ok(ws)
}

/// Send a terse HTTP 404 and close, for non-tunnel requests.
pub async fn send_reject<S>(mut stream: S, reason: &'static str) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    warn!(reason, "connection rejected");
    let response = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
    tokio::io::AsyncWriteExt::write_all(&mut stream, response).await?;
    Ok(())
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HTTP_HEADER_END.len())
        .position(|w| w == HTTP_HEADER_END)
        .map(|idx| idx + HTTP_HEADER_END.len())
}

fn path_matches(cfg: &WsCfg, path: &str) -> bool {
    let path_only = path.split('?').next().unwrap_or("");
    path_only == cfg.path
}

fn host_matches(cfg: &WsCfg, host: Option<&str>) -> bool {
    let expected = match cfg.host.as_deref() {
        Some(v) => v,
        None => return true,
    };
    let host = match host {
        Some(v) => v,
        None => return false,
    };
    let host_only = host.split(':').next().unwrap_or("");
    host_only.eq_ignore_ascii_case(expected)
}
