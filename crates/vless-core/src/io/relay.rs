//! Bidirectional byte relay between a tunnel client and its upstream.
//!
//! The relay is an opaque byte pipe: no framing is imposed in either
//! direction. Each direction is driven as an independent poll-based state
//! machine within a single future, so back-pressure on one direction never
//! stalls the other and a slow reader pauses the opposite read instead of
//! buffering unboundedly.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant as TokioInstant;

/// Trait for recording relayed byte counts.
///
/// The server records to its metrics facade; tests use counters or the
/// no-op implementation.
pub trait RelayMetrics {
    /// Record bytes copied from the client toward the upstream.
    fn record_client_to_upstream(&self, bytes: u64);
    /// Record bytes copied from the upstream toward the client.
    fn record_upstream_to_client(&self, bytes: u64);
}

/// No-op metrics implementation for cases where metrics aren't needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl RelayMetrics for NoOpMetrics {
    #[inline]
    fn record_client_to_upstream(&self, _bytes: u64) {}
    #[inline]
    fn record_upstream_to_client(&self, _bytes: u64) {}
}

/// State machine for one-directional copy with flush.
enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),       // bytes flushing
    ShuttingDown,
    Done,
}

/// Result of polling one copy direction.
enum CopyPoll {
    /// Data was flushed; contains the byte count for metrics.
    Flushed(usize),
    /// Direction finished (EOF + shutdown of the write side).
    Finished,
}

/// Poll-driven one-directional copy: read, write, flush.
fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *state = CopyState::ShuttingDown;
                        } else {
                            *state = CopyState::Writing(0, n);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            let total = *len;
                            *state = CopyState::Flushing(total);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(CopyPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Bidirectional relay with half-close handling.
///
/// Both directions run concurrently within a single task using poll-based
/// I/O. When one side reaches EOF its counterpart's write side is shut down;
/// an I/O error on either side ends the whole session. The idle timeout
/// fires when **neither** direction has transferred data within
/// `idle_timeout`, so a half-open session cannot linger forever.
///
/// # Arguments
///
/// * `client` - The client side (e.g., the WebSocket byte stream)
/// * `upstream` - The upstream TCP connection
/// * `idle_timeout` - Maximum time without data transfer before closing
/// * `buffer_size` - Size of the per-direction read buffers
/// * `metrics` - Metrics recorder for bytes transferred
pub async fn relay_bidirectional<A, B, M>(
    client: A,
    upstream: B,
    idle_timeout: Duration,
    buffer_size: usize,
    metrics: &M,
) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    M: RelayMetrics,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

    let mut buf_up = vec![0u8; buffer_size];
    let mut buf_down = vec![0u8; buffer_size];
    let mut state_up = CopyState::Reading;
    let mut state_down = CopyState::Reading;

    let idle_sleep = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_sleep);

    let mut up_done = false;
    let mut down_done = false;

    loop {
        if up_done && down_done {
            return Ok(());
        }

        // Poll both directions under one future. Each direction registers
        // its own waker, so either can make progress independently; a
        // blocked write on one side cannot stall the other direction.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut activity = false;
            let mut error: Option<io::Error> = None;

            if !up_done {
                match poll_copy_direction(
                    cx,
                    &mut client_r,
                    &mut upstream_w,
                    &mut buf_up,
                    &mut state_up,
                ) {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        metrics.record_client_to_upstream(n as u64);
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        up_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        error = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !down_done {
                match poll_copy_direction(
                    cx,
                    &mut upstream_r,
                    &mut client_w,
                    &mut buf_down,
                    &mut state_down,
                ) {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        metrics.record_upstream_to_client(n as u64);
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        down_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        error = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if let Some(e) = error {
                return Poll::Ready(Err(e));
            }

            if any_ready {
                Poll::Ready(Ok(activity))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = both => {
                let activity = result?;
                if activity {
                    idle_sleep.as_mut().reset(TokioInstant::now() + idle_timeout);
                }
            }
            _ = &mut idle_sleep => {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct TestMetrics {
        up: AtomicU64,
        down: AtomicU64,
    }

    impl RelayMetrics for TestMetrics {
        fn record_client_to_upstream(&self, bytes: u64) {
            self.up.fetch_add(bytes, Ordering::Relaxed);
        }
        fn record_upstream_to_client(&self, bytes: u64) {
            self.down.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn relays_both_directions() {
        let (client, client_side) = duplex(1024);
        let (upstream_side, upstream) = duplex(1024);

        let metrics = TestMetrics::default();
        let relay_handle = tokio::spawn(async move {
            relay_bidirectional(
                client_side,
                upstream_side,
                Duration::from_secs(5),
                1024,
                &metrics,
            )
            .await
        });

        let (mut client_r, mut client_w) = tokio::io::split(client);
        let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

        client_w.write_all(b"hello").await.unwrap();
        drop(client_w);

        let mut buf = vec![0u8; 1024];
        let n = upstream_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        upstream_w.write_all(b"world").await.unwrap();
        drop(upstream_w);

        let n = client_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        relay_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn preserves_order_across_many_writes() {
        let (client, client_side) = duplex(64);
        let (upstream_side, upstream) = duplex(64);

        let relay_handle = tokio::spawn(async move {
            relay_bidirectional(
                client_side,
                upstream_side,
                Duration::from_secs(5),
                64,
                &NoOpMetrics,
            )
            .await
        });

        let (_client_r, mut client_w) = tokio::io::split(client);
        let (mut upstream_r, _upstream_w) = tokio::io::split(upstream);

        let mut expected = Vec::new();
        for i in 0u16..100 {
            let chunk = i.to_be_bytes();
            expected.extend_from_slice(&chunk);
            client_w.write_all(&chunk).await.unwrap();
        }
        drop(client_w);

        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = upstream_r.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, expected);

        drop(_client_r);
        drop(_upstream_w);
        relay_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closes_on_idle_timeout() {
        let (client, client_side) = duplex(1024);
        let (upstream_side, _upstream) = duplex(1024);

        let start = TokioInstant::now();
        let result = relay_bidirectional(
            client_side,
            upstream_side,
            Duration::from_millis(50),
            1024,
            &NoOpMetrics,
        )
        .await;

        result.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        drop(client);
    }
}
