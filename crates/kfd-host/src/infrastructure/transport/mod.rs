//! Frame transports between the host and a KFD adapter or relay.
//!
//! A transport moves whole payloads: [`FrameTransport::send`] frames and
//! writes one, and [`FrameTransport::read_next_frame`] waits for the next one
//! received.  Received bytes are decoded by a background read loop into a
//! [`PacketQueue`], which the session layer only ever observes through
//! `read_next_frame`.
//!
//! # Polling the queue (for beginners)
//!
//! Reads do not block on the socket.  Instead `read_next_frame` checks the
//! queue every [`ReadPolicy::poll_interval`] up to
//! [`ReadPolicy::max_attempts`] times (10 ms × 100 = 1 s by default).  When
//! the window runs out the queue and any half-received frame are discarded so
//! the next attempt starts from a clean state, and the call fails with
//! [`TransportError::CommunicationTimeout`].
//!
//! # Implementations
//!
//! - [`stream::StreamTransport`] – any `AsyncRead + AsyncWrite` byte stream
//!   (a TCP-exposed serial adapter, or an in-memory duplex in tests).
//! - [`crate::infrastructure::relay::RelayTransport`] – the WebSocket relay.
//! - [`mock::MockTransport`] – a scripted radio for tests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod packet_queue;
pub mod stream;

pub use packet_queue::PacketQueue;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No frame arrived within the read window.
    #[error("no frame received within {0:?}")]
    CommunicationTimeout(Duration),

    /// The transport was disconnected; no more frames will arrive.
    #[error("transport closed")]
    Closed,

    /// Reading or writing the underlying stream failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The network relay rejected or failed to carry a message.
    #[error("relay error: {0}")]
    Relay(String),
}

/// How long `read_next_frame` waits, expressed as a poll grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl ReadPolicy {
    /// Total time a read may wait before timing out.
    pub fn window(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_attempts: 100,
        }
    }
}

/// A duplex that carries whole frames to and from the radio side.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Frames `payload` for the wire and writes it.
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next received frame, bounded by the read policy.
    async fn read_next_frame(&self) -> Result<Vec<u8>, TransportError>;

    /// Drops every queued frame and any partially received frame.
    async fn clear(&self);
}
