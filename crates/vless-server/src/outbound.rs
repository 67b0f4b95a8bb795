//! Outbound TCP connector.
//!
//! Given the rendered host string and port from a handshake, this resolves
//! one address and connects exactly once. A failed connect is final: the
//! session is torn down with no ack and no retry.

use std::io;

use tokio::net::{lookup_host, TcpStream};

/// Connect to the destination named by a handshake.
pub async fn connect_upstream(
    host: &str,
    port: u16,
    send_buf: usize,
    recv_buf: usize,
) -> io::Result<TcpStream> {
    let addr = lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "destination did not resolve"))?;

    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    if send_buf > 0 {
        socket.set_send_buffer_size(send_buf as u32)?;
    }
    if recv_buf > 0 {
        socket.set_recv_buffer_size(recv_buf as u32)?;
    }
    socket.connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn connects_to_rendered_ipv4() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            peer.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = connect_upstream("127.0.0.1", port, 0, 0).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn uncompressed_ipv6_loopback_resolves() {
        // The rendered form "0:0:0:0:0:0:0:1" must be accepted as-is.
        let listener = match tokio::net::TcpListener::bind("[::1]:0").await {
            Ok(v) => v,
            // No IPv6 on this host; nothing to assert
            Err(_) => return,
        };
        let port = listener.local_addr().unwrap().port();
        connect_upstream("0:0:0:0:0:0:0:1", port, 0, 0).await.unwrap();
    }

    #[tokio::test]
    async fn refused_connect_is_an_error() {
        // Bind then drop to get a port that is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(connect_upstream("127.0.0.1", port, 0, 0).await.is_err());
    }
}
