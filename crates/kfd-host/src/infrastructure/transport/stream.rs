//! Frame transport over any async byte stream.
//!
//! Used for KFD adapters exposed as a byte stream: a serial-over-TCP bridge
//! in production, `tokio::io::duplex` in tests.
//!
//! # Read loop
//!
//! The stream is split into independent halves.  A spawned task reads the
//! read half continuously and feeds every chunk into the [`PacketQueue`],
//! whose decoder turns the byte stream back into frames.  A single read may
//! carry part of a frame or several frames; the decoder handles both.  When
//! the stream reaches EOF or fails, the queue is closed and pending reads
//! fail with [`TransportError::Closed`].

use async_trait::async_trait;
use kfd_core::protocol::framing::encode_frame;
use kfd_core::FrameScheme;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FrameTransport, PacketQueue, ReadPolicy, TransportError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A [`FrameTransport`] over a byte stream with a background read loop.
pub struct StreamTransport {
    writer: Mutex<BoxedWriter>,
    scheme: FrameScheme,
    queue: PacketQueue,
    policy: ReadPolicy,
    reader: JoinHandle<()>,
}

impl StreamTransport {
    /// Wraps `stream` and starts its read loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(stream: S, scheme: FrameScheme, policy: ReadPolicy) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let queue = PacketQueue::framed(scheme);
        let reader = tokio::spawn(read_loop(read_half, queue.clone()));
        Self {
            writer: Mutex::new(Box::new(write_half) as BoxedWriter),
            scheme,
            queue,
            policy,
            reader,
        }
    }

    /// Connects to an adapter exposed on a TCP port.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the connection cannot be established.
    pub async fn connect_tcp(
        addr: &str,
        scheme: FrameScheme,
        policy: ReadPolicy,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(%addr, ?scheme, "connected to adapter");
        Ok(Self::new(stream, scheme, policy))
    }

    pub fn scheme(&self) -> FrameScheme {
        self.scheme
    }

    /// Stops the read loop.  Pending and later reads fail with
    /// [`TransportError::Closed`].
    pub async fn disconnect(&self) {
        self.reader.abort();
        self.queue.close().await;
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl FrameTransport for StreamTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.queue.is_closed().await {
            return Err(TransportError::Closed);
        }
        let frame = encode_frame(self.scheme, payload);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        debug!(payload_len = payload.len(), wire_len = frame.len(), "frame sent");
        Ok(())
    }

    async fn read_next_frame(&self) -> Result<Vec<u8>, TransportError> {
        self.queue.read_next_frame(self.policy).await
    }

    async fn clear(&self) {
        self.queue.clear().await;
    }
}

async fn read_loop<R>(mut read_half: ReadHalf<R>, queue: PacketQueue)
where
    R: AsyncRead + Send,
{
    let mut read_tmp = vec![0u8; 1024];
    loop {
        let n = match read_half.read(&mut read_tmp).await {
            Ok(0) => {
                debug!("adapter stream closed (EOF)");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("read from adapter failed: {e}");
                break;
            }
        };
        queue.push_bytes(&read_tmp[..n]).await;
    }
    queue.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kfd_core::FrameDecoder;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_writes_framed_payload() {
        // Arrange
        let (host, mut radio) = tokio::io::duplex(256);
        let transport = StreamTransport::new(host, FrameScheme::SingleDelimiter, ReadPolicy::default());

        // Act
        transport.send(&[0x01, 0x61, 0x02]).await.unwrap();
        let mut buf = vec![0u8; 16];
        let n = radio.read(&mut buf).await.unwrap();

        // Assert
        let mut decoder = FrameDecoder::new(FrameScheme::SingleDelimiter);
        assert_eq!(decoder.feed(&buf[..n]), vec![vec![0x01, 0x61, 0x02]]);
    }

    #[tokio::test]
    async fn test_frames_split_across_writes_are_reassembled() {
        // Arrange
        let (host, mut radio) = tokio::io::duplex(256);
        let transport = StreamTransport::new(host, FrameScheme::DualDelimiter, ReadPolicy::default());
        let wire = encode_frame(FrameScheme::DualDelimiter, &[0x10, 0x62, 0x20]);

        // Act
        let (first, second) = wire.split_at(2);
        radio.write_all(first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        radio.write_all(second).await.unwrap();
        let frame = transport.read_next_frame().await;

        // Assert
        assert_eq!(frame.unwrap(), vec![0x10, 0x62, 0x20]);
    }

    #[tokio::test]
    async fn test_peer_close_fails_reads_with_closed() {
        let (host, radio) = tokio::io::duplex(64);
        let transport = StreamTransport::new(host, FrameScheme::SingleDelimiter, ReadPolicy::default());

        drop(radio);

        assert!(matches!(
            transport.read_next_frame().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_rejects_further_sends() {
        let (host, _radio) = tokio::io::duplex(64);
        let transport = StreamTransport::new(host, FrameScheme::SingleDelimiter, ReadPolicy::default());

        transport.disconnect().await;

        assert!(matches!(transport.send(&[1]).await, Err(TransportError::Closed)));
    }
}
