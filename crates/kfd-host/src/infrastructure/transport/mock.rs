//! Mock transport for unit and integration testing.
//!
//! [`MockTransport`] records every payload sent and hands it to a responder
//! closure, whose replies are queued for `read_next_frame`.  Reads use the
//! same [`PacketQueue`] polling as real transports, so timeouts behave
//! identically (run tests with `start_paused = true` to skip the waiting).
//!
//! Two ready-made radios cover most tests:
//!
//! - [`MockTransport::three_wire_radio`] – acknowledges the adapter key
//!   signature and unwraps three-wire KMM frames.
//! - [`MockTransport::dli_radio`] – unwraps the DLI preamble and answers with
//!   the same MFID.
//!
//! Both answer session-control traffic themselves via
//! [`answer_session_control`] and pass every other KMM body to the handler.

use async_trait::async_trait;
use kfd_core::protocol::kmm::{
    unwrap_preamble, wrap_preamble, Mfid90Opcode, Mfid90SessionControl, SessionControl,
    SessionOpcode, SourceDevice,
};
use kfd_core::protocol::three_wire::{
    unwrap_kmm, wrap_kmm, ADAPTER_CMD_SEND_KEY_SIGNATURE, ADAPTER_RSP_SEND_KEY_SIGNATURE,
};
use kfd_core::{KmmBody, KmmMessage};
use tokio::sync::Mutex;

use super::{FrameTransport, PacketQueue, ReadPolicy, TransportError};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// A scripted [`FrameTransport`].
pub struct MockTransport {
    responder: Mutex<Responder>,
    sent: Mutex<Vec<Vec<u8>>>,
    queue: PacketQueue,
    policy: ReadPolicy,
}

impl MockTransport {
    /// A transport whose peer never answers.
    pub fn silent() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    /// A transport answering each sent payload with the frames `responder`
    /// returns.
    pub fn with_responder(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        Self {
            responder: Mutex::new(Box::new(responder)),
            sent: Mutex::new(Vec::new()),
            queue: PacketQueue::unframed(),
            policy: ReadPolicy::default(),
        }
    }

    /// A radio behind a direct adapter.
    ///
    /// `handler` sees every non-session-control body; returning `None`
    /// leaves the command unanswered.
    pub fn three_wire_radio(
        mut handler: impl FnMut(&KmmBody) -> Option<KmmBody> + Send + 'static,
    ) -> Self {
        Self::with_responder(move |payload| {
            if payload == [ADAPTER_CMD_SEND_KEY_SIGNATURE] {
                return vec![vec![ADAPTER_RSP_SEND_KEY_SIGNATURE]];
            }
            let Some(body) = decode_three_wire_body(payload) else {
                return Vec::new();
            };
            let reply = answer_session_control(&body).or_else(|| handler(&body));
            reply
                .and_then(|body| KmmMessage::new(body).to_bytes().ok())
                .and_then(|kmm| wrap_kmm(&kmm).ok())
                .map(|frame| vec![frame])
                .unwrap_or_default()
        })
    }

    /// A radio reached through the network relay.
    pub fn dli_radio(mut handler: impl FnMut(&KmmBody) -> Option<KmmBody> + Send + 'static) -> Self {
        Self::with_responder(move |payload| {
            let Some((mfid, body)) = decode_dli_body(payload) else {
                return Vec::new();
            };
            let reply = answer_session_control(&body).or_else(|| handler(&body));
            reply
                .and_then(|body| KmmMessage::new(body).to_bytes().ok())
                .map(|kmm| vec![wrap_preamble(mfid, &kmm)])
                .unwrap_or_default()
        })
    }

    /// Overrides the read policy (the default is 10 ms × 100).
    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Every payload sent so far, oldest first.
    pub async fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }

    /// Queues an unsolicited frame, as if the peer had sent it.
    pub async fn inject_frame(&self, frame: Vec<u8>) {
        self.queue.push_frame(frame).await;
    }

    /// Simulates the peer going away.
    pub async fn close(&self) {
        self.queue.close().await;
    }
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.queue.is_closed().await {
            return Err(TransportError::Closed);
        }
        self.sent.lock().await.push(payload.to_vec());
        let replies = {
            let mut guard = self.responder.lock().await;
            let responder = &mut *guard;
            responder(payload)
        };
        for reply in replies {
            self.queue.push_frame(reply).await;
        }
        Ok(())
    }

    async fn read_next_frame(&self) -> Result<Vec<u8>, TransportError> {
        self.queue.read_next_frame(self.policy).await
    }

    async fn clear(&self) {
        self.queue.clear().await;
    }
}

/// Decodes a sent three-wire KMM frame; `None` for anything else.
pub fn decode_three_wire_body(payload: &[u8]) -> Option<KmmBody> {
    let kmm = unwrap_kmm(payload).ok()?;
    KmmMessage::parse(kmm).ok().map(|msg| msg.body)
}

/// Decodes a sent DLI payload into its MFID and body.
pub fn decode_dli_body(payload: &[u8]) -> Option<(u8, KmmBody)> {
    let (mfid, kmm) = unwrap_preamble(payload).ok()?;
    let body = KmmMessage::parse_with_mfid(kmm, mfid).ok()?.body;
    Some((mfid, body))
}

/// The reply a well-behaved radio gives to a session-control command.
pub fn answer_session_control(body: &KmmBody) -> Option<KmmBody> {
    match body {
        KmmBody::SessionControl(cmd) => {
            let opcode = match cmd.opcode {
                SessionOpcode::ReadyRequest => SessionOpcode::ReadyGeneralMode,
                SessionOpcode::TransferDone => SessionOpcode::TransferDone,
                SessionOpcode::EndSession => SessionOpcode::EndSessionAck,
                SessionOpcode::Disconnect => SessionOpcode::DisconnectAck,
                SessionOpcode::BeginSession => SessionOpcode::BeginSessionAck,
                _ => return None,
            };
            Some(KmmBody::SessionControl(SessionControl {
                opcode,
                source: SourceDevice::Mr,
            }))
        }
        KmmBody::Mfid90SessionControl(cmd) => {
            let opcode = match cmd.opcode {
                Mfid90Opcode::Connect => Mfid90Opcode::ConnectAck,
                Mfid90Opcode::BeginSession => Mfid90Opcode::BeginSessionAck,
                Mfid90Opcode::TransferDone => Mfid90Opcode::TransferDone,
                Mfid90Opcode::EndSession => Mfid90Opcode::EndSessionAck,
                Mfid90Opcode::Disconnect => Mfid90Opcode::DisconnectAck,
                _ => return None,
            };
            Some(KmmBody::Mfid90SessionControl(Mfid90SessionControl {
                opcode,
                source: SourceDevice::Mr,
            }))
        }
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
