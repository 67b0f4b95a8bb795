//! Integration tests for vless-server.
//!
//! These tests verify the complete server flow including:
//! - WebSocket upgrade routing by path marker
//! - Handshake parsing and credential check
//! - Ack ordering relative to relayed payload
//! - Bidirectional relay against an echo upstream

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use vless_proto::{write_handshake, Credential, HostRef};
use vless_server::config::{
    AuthConfig, Config, LoggingConfig, MetricsConfig, ServerConfig, WebSocketConfig,
};
use vless_server::{run_with_shutdown, CancellationToken};

const UUID: &str = "a2c803ad-84dd-4ad7-9580-be9be3f7e1af";
const WRONG_UUID: &str = "a2c803ad-84dd-4ad7-9580-be9be3f7e1b0";

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Test Helper: Mock Echo Server
// ============================================================================

/// A simple TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

// ============================================================================
// Test Helper: Tunnel Server
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    _shutdown: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        // Find an available port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = Config {
            server: ServerConfig {
                listen: addr.to_string(),
                idle_timeout_secs: 30,
                handshake_timeout_secs: 5,
                max_header_bytes: 8192,
                max_connections: None,
                relay_buffer_size: 32768,
                tcp_send_buffer: 0,
                tcp_recv_buffer: 0,
                connection_backlog: 128,
            },
            auth: AuthConfig { uuid: UUID.into() },
            websocket: WebSocketConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig {
                level: Some("warn".to_string()),
                ..Default::default()
            },
        };
        configure(&mut config);

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = run_with_shutdown(config, server_shutdown).await;
        });

        // Wait for the server to start
        tokio::time::sleep(Duration::from_millis(300)).await;

        Self {
            addr,
            _shutdown: shutdown,
        }
    }

    async fn connect(&self, path: &str) -> ClientWs {
        let (ws, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .expect("websocket upgrade failed");
        ws
    }
}

// ============================================================================
// Client-side handshake helpers
// ============================================================================

fn handshake_bytes(uuid: &str, host: HostRef<'_>, port: u16, payload: &[u8]) -> Vec<u8> {
    let credential = Credential::from_uuid(uuid).unwrap();
    let mut buf = BytesMut::new();
    write_handshake(&mut buf, 0, &credential, &host, port).unwrap();
    buf.extend_from_slice(payload);
    buf.to_vec()
}

/// Wait for the next data-bearing frame.
async fn next_payload(ws: &mut ClientWs) -> Vec<u8> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed unexpectedly")
            .expect("websocket error");
        match msg {
            Message::Binary(data) => return data,
            Message::Text(text) => return text.into_bytes(),
            _ => continue,
        }
    }
}

/// Drain the connection until it closes, returning every payload byte seen.
/// An abrupt server-side drop counts as a close.
async fn drain_until_close(ws: &mut ClientWs) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => out.extend_from_slice(&data),
            Ok(Some(Ok(Message::Text(text)))) => out.extend_from_slice(text.as_bytes()),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return out,
            Err(_) => panic!("timed out waiting for the session to close"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

/// A valid handshake gets the 2-byte ack and the initial payload comes back
/// from the echo upstream.
#[tokio::test]
async fn tunnel_relays_ipv4_echo() {
    let echo = MockEchoServer::start();
    let server = TestServer::start().await;
    let mut ws = server.connect("/").await;

    let ip = match echo.addr {
        SocketAddr::V4(v4) => v4.ip().octets(),
        _ => panic!("expected IPv4 echo server"),
    };
    let payload = b"Hello, tunnel!";
    ws.send(Message::Binary(handshake_bytes(
        UUID,
        HostRef::Ipv4(ip),
        echo.addr.port(),
        payload,
    )))
    .await
    .unwrap();

    // The ack must be the first thing on the stream, even though the echo
    // upstream answers immediately.
    assert_eq!(next_payload(&mut ws).await, vec![0, 0]);

    let mut echoed = Vec::new();
    while echoed.len() < payload.len() {
        echoed.extend_from_slice(&next_payload(&mut ws).await);
    }
    assert_eq!(echoed, payload);

    // Frames after the handshake are raw payload, relayed as-is.
    ws.send(Message::Binary(b"second frame".to_vec()))
        .await
        .unwrap();
    let mut echoed = Vec::new();
    while echoed.len() < b"second frame".len() {
        echoed.extend_from_slice(&next_payload(&mut ws).await);
    }
    assert_eq!(echoed, b"second frame");
}

/// Domain-typed destinations go through the same path; an IP literal in the
/// domain slot must connect as-is.
#[tokio::test]
async fn tunnel_relays_domain_destination() {
    let echo = MockEchoServer::start();
    let server = TestServer::start().await;
    let mut ws = server.connect("/").await;

    ws.send(Message::Binary(handshake_bytes(
        UUID,
        HostRef::Domain("127.0.0.1"),
        echo.addr.port(),
        b"ping",
    )))
    .await
    .unwrap();

    assert_eq!(next_payload(&mut ws).await, vec![0, 0]);
    let mut echoed = Vec::new();
    while echoed.len() < 4 {
        echoed.extend_from_slice(&next_payload(&mut ws).await);
    }
    assert_eq!(echoed, b"ping");
}

/// Bytes relayed in both directions keep their order with no loss.
#[tokio::test]
async fn relay_preserves_order_across_frames() {
    let echo = MockEchoServer::start();
    let server = TestServer::start().await;
    let mut ws = server.connect("/").await;

    let ip = match echo.addr {
        SocketAddr::V4(v4) => v4.ip().octets(),
        _ => panic!("expected IPv4 echo server"),
    };
    ws.send(Message::Binary(handshake_bytes(
        UUID,
        HostRef::Ipv4(ip),
        echo.addr.port(),
        b"",
    )))
    .await
    .unwrap();
    assert_eq!(next_payload(&mut ws).await, vec![0, 0]);

    let mut expected = Vec::new();
    for i in 0u32..50 {
        let chunk = vec![(i % 251) as u8; 1 + (i as usize % 97)];
        expected.extend_from_slice(&chunk);
        ws.send(Message::Binary(chunk)).await.unwrap();
    }

    let mut echoed = Vec::new();
    while echoed.len() < expected.len() {
        echoed.extend_from_slice(&next_payload(&mut ws).await);
    }
    assert_eq!(echoed, expected);
}

/// A credential differing in at least one byte closes the session with zero
/// bytes written to the client.
#[tokio::test]
async fn wrong_credential_closes_with_zero_bytes() {
    let echo = MockEchoServer::start();
    let server = TestServer::start().await;
    let mut ws = server.connect("/").await;

    let ip = match echo.addr {
        SocketAddr::V4(v4) => v4.ip().octets(),
        _ => panic!("expected IPv4 echo server"),
    };
    ws.send(Message::Binary(handshake_bytes(
        WRONG_UUID,
        HostRef::Ipv4(ip),
        echo.addr.port(),
        b"should never arrive",
    )))
    .await
    .unwrap();

    assert!(drain_until_close(&mut ws).await.is_empty());
}

/// A refused upstream connect means the ack is never written.
#[tokio::test]
async fn refused_upstream_sends_no_ack() {
    // Bind then drop to get a port that is very likely closed.
    let closed = TcpListener::bind("127.0.0.1:0").unwrap();
    let dest_port = closed.local_addr().unwrap().port();
    drop(closed);

    let server = TestServer::start().await;
    let mut ws = server.connect("/").await;

    ws.send(Message::Binary(handshake_bytes(
        UUID,
        HostRef::Ipv4([127, 0, 0, 1]),
        dest_port,
        b"",
    )))
    .await
    .unwrap();

    assert!(drain_until_close(&mut ws).await.is_empty());
}

/// A handshake shorter than the minimum is rejected without bringing the
/// server down.
#[tokio::test]
async fn short_handshake_is_rejected_and_server_survives() {
    let echo = MockEchoServer::start();
    let server = TestServer::start().await;

    let mut ws = server.connect("/").await;
    ws.send(Message::Binary(vec![0u8; 5])).await.unwrap();
    assert!(drain_until_close(&mut ws).await.is_empty());

    // A fresh, valid session still works.
    let ip = match echo.addr {
        SocketAddr::V4(v4) => v4.ip().octets(),
        _ => panic!("expected IPv4 echo server"),
    };
    let mut ws = server.connect("/").await;
    ws.send(Message::Binary(handshake_bytes(
        UUID,
        HostRef::Ipv4(ip),
        echo.addr.port(),
        b"still alive",
    )))
    .await
    .unwrap();
    assert_eq!(next_payload(&mut ws).await, vec![0, 0]);
}

/// Upgrades are routed by the configured path marker.
#[tokio::test]
async fn upgrade_path_marker_is_enforced() {
    let echo = MockEchoServer::start();
    let server = TestServer::start_with(|config| {
        config.websocket.path = "/tunnel".into();
    })
    .await;

    // The wrong path is rejected at the HTTP layer.
    assert!(
        connect_async(format!("ws://{}/", server.addr)).await.is_err(),
        "upgrade on a non-tunnel path must be rejected"
    );

    // The configured path carries a full session.
    let ip = match echo.addr {
        SocketAddr::V4(v4) => v4.ip().octets(),
        _ => panic!("expected IPv4 echo server"),
    };
    let mut ws = server.connect("/tunnel").await;
    ws.send(Message::Binary(handshake_bytes(
        UUID,
        HostRef::Ipv4(ip),
        echo.addr.port(),
        b"routed",
    )))
    .await
    .unwrap();
    assert_eq!(next_payload(&mut ws).await, vec![0, 0]);
}

/// A client that upgrades but never sends a handshake is cut off by the
/// handshake timeout instead of holding a session slot forever.
#[tokio::test]
async fn silent_client_is_timed_out() {
    let server = TestServer::start_with(|config| {
        config.server.handshake_timeout_secs = 1;
    })
    .await;

    let mut ws = server.connect("/").await;
    // Send nothing; the server must close on its own.
    assert!(drain_until_close(&mut ws).await.is_empty());
}
