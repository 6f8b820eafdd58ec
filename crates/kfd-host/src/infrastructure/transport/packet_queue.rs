//! FIFO of received frames shared between a read loop and its transport.
//!
//! The queue is a cheap-to-clone handle around shared state.  The read loop
//! owns one handle and pushes bytes; the transport owns another and pops
//! frames.  Byte-oriented transports decode through a [`FrameDecoder`];
//! message-oriented ones (the relay) push whole frames.

use std::collections::VecDeque;
use std::sync::Arc;

use kfd_core::{FrameDecoder, FrameScheme};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{ReadPolicy, TransportError};

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<Vec<u8>>,
    decoder: Option<FrameDecoder>,
    closed: bool,
}

/// Shared queue of decoded frames.
#[derive(Debug, Clone)]
pub struct PacketQueue {
    state: Arc<Mutex<QueueState>>,
}

impl PacketQueue {
    /// A queue fed with raw bytes that are split into frames by `scheme`.
    pub fn framed(scheme: FrameScheme) -> Self {
        Self::with_decoder(Some(FrameDecoder::new(scheme)))
    }

    /// A queue fed with frames that are already delimited.
    pub fn unframed() -> Self {
        Self::with_decoder(None)
    }

    fn with_decoder(decoder: Option<FrameDecoder>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                frames: VecDeque::new(),
                decoder,
                closed: false,
            })),
        }
    }

    /// Feeds raw bytes from the wire, queueing every frame they complete.
    ///
    /// On an unframed queue the bytes are queued as one frame.
    pub async fn push_bytes(&self, bytes: &[u8]) {
        let mut state = self.state.lock().await;
        let frames = match state.decoder.as_mut() {
            Some(decoder) => decoder.feed(bytes),
            None if bytes.is_empty() => Vec::new(),
            None => vec![bytes.to_vec()],
        };
        for frame in frames {
            trace!(len = frame.len(), "frame queued");
            state.frames.push_back(frame);
        }
    }

    /// Queues a frame that needs no decoding.
    pub async fn push_frame(&self, frame: Vec<u8>) {
        self.state.lock().await.frames.push_back(frame);
    }

    /// Removes and returns the oldest frame, if any.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        self.state.lock().await.frames.pop_front()
    }

    /// Number of frames waiting.
    pub async fn len(&self) -> usize {
        self.state.lock().await.frames.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Discards queued frames and the frame in progress.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let dropped = state.frames.len();
        state.frames.clear();
        if let Some(decoder) = state.decoder.as_mut() {
            decoder.reset();
        }
        if dropped > 0 {
            debug!(dropped, "packet queue cleared");
        }
    }

    /// Marks the source as gone.  Frames already queued can still be read.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Polls for the next frame according to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the queue is closed and empty,
    /// and [`TransportError::CommunicationTimeout`] after the last poll.  A
    /// timeout clears the queue.
    pub async fn read_next_frame(&self, policy: ReadPolicy) -> Result<Vec<u8>, TransportError> {
        for _ in 0..policy.max_attempts {
            {
                let mut state = self.state.lock().await;
                if let Some(frame) = state.frames.pop_front() {
                    return Ok(frame);
                }
                if state.closed {
                    return Err(TransportError::Closed);
                }
            }
            tokio::time::sleep(policy.poll_interval).await;
        }
        self.clear().await;
        Err(TransportError::CommunicationTimeout(policy.window()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
