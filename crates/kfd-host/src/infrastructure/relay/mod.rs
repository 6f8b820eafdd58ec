//! Frame transport over the WebSocket network relay.
//!
//! The relay forwards frames between this host and a radio on a remote
//! network.  Frames are not byte-framed here: each WebSocket binary message
//! already carries exactly one frame, so received frames go straight into an
//! unframed [`PacketQueue`].
//!
//! ```text
//! RelayTransport::send ──► {"targetIp": …, "payload": […]} ──► relay ──► radio
//! read loop          ◄──  binary message                 ◄── relay ◄── radio
//! ```

pub mod messages;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use self::messages::{classify, RelayEvent, RelayRequest};
use super::transport::{FrameTransport, PacketQueue, ReadPolicy, TransportError};

/// A [`FrameTransport`] that reaches a radio through the network relay.
pub struct RelayTransport<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    target_ip: String,
    queue: PacketQueue,
    policy: ReadPolicy,
    reader: JoinHandle<()>,
}

impl RelayTransport<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    /// Connects to the relay at `url` and addresses frames to `target_ip`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Relay`] when the WebSocket handshake fails.
    pub async fn connect(url: &str, target_ip: impl Into<String>, policy: ReadPolicy) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Relay(format!("cannot connect to {url}: {e}")))?;
        info!(%url, "connected to relay");
        Ok(Self::new(ws, target_ip, policy))
    }
}

impl<S> RelayTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established WebSocket and starts its read loop.
    pub fn new(ws: WebSocketStream<S>, target_ip: impl Into<String>, policy: ReadPolicy) -> Self {
        let (sink, stream) = ws.split();
        let queue = PacketQueue::unframed();
        let reader = tokio::spawn(read_loop(stream, queue.clone()));
        Self {
            sink: Mutex::new(sink),
            target_ip: target_ip.into(),
            queue,
            policy,
            reader,
        }
    }

    pub fn target_ip(&self) -> &str {
        &self.target_ip
    }

    /// Closes the WebSocket and stops the read loop.
    pub async fn disconnect(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("relay close failed: {e}");
        }
        self.reader.abort();
        self.queue.close().await;
    }
}

impl<S> Drop for RelayTransport<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl<S> FrameTransport for RelayTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.queue.is_closed().await {
            return Err(TransportError::Closed);
        }
        let request = RelayRequest {
            target_ip: self.target_ip.clone(),
            payload: payload.to_vec(),
        };
        let message = request
            .to_message()
            .map_err(|e| TransportError::Relay(format!("cannot encode request: {e}")))?;
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::Relay(e.to_string()))?;
        debug!(payload_len = payload.len(), target = %self.target_ip, "frame relayed");
        Ok(())
    }

    async fn read_next_frame(&self) -> Result<Vec<u8>, TransportError> {
        self.queue.read_next_frame(self.policy).await
    }

    async fn clear(&self) {
        self.queue.clear().await;
    }
}

async fn read_loop<S>(mut stream: SplitStream<WebSocketStream<S>>, queue: PacketQueue)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(message) => match classify(message) {
                RelayEvent::Welcome => debug!("relay welcome received"),
                RelayEvent::Frame(frame) => {
                    debug!(len = frame.len(), "frame received from relay");
                    queue.push_frame(frame).await;
                }
                RelayEvent::Closed => {
                    info!("relay closed the connection");
                    break;
                }
                RelayEvent::Ignored => {}
            },
            Err(e) => {
                warn!("relay read failed: {e}");
                break;
            }
        }
    }
    queue.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Starts a relay that answers "welcome", then echoes each request's
    /// payload back as a binary frame.
    async fn echo_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Text("welcome".to_string())).await.unwrap();
            while let Some(Ok(Message::Text(json))) = ws.next().await {
                let request: RelayRequest = serde_json::from_str(&json).unwrap();
                assert_eq!(request.target_ip, "10.1.2.3");
                ws.send(Message::Binary(request.payload)).await.unwrap();
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_send_and_receive_through_relay() {
        // Arrange
        let url = echo_relay().await;
        let transport = RelayTransport::connect(&url, "10.1.2.3", ReadPolicy::default())
            .await
            .unwrap();

        // Act
        transport.send(&[0x00, 0x90, 0x80]).await.unwrap();
        let frame = transport.read_next_frame().await.unwrap();

        // Assert: the welcome text never reaches the queue
        assert_eq!(frame, vec![0x00, 0x90, 0x80]);
    }

    #[tokio::test]
    async fn test_connect_to_missing_relay_fails() {
        // Bind then drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RelayTransport::connect(&format!("ws://{addr}"), "10.1.2.3", ReadPolicy::default()).await;

        assert!(matches!(result, Err(TransportError::Relay(_))));
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_closed() {
        let url = echo_relay().await;
        let transport = RelayTransport::connect(&url, "10.1.2.3", ReadPolicy::default())
            .await
            .unwrap();

        transport.disconnect().await;
        let result = transport.send(&[0x01]).await;

        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
