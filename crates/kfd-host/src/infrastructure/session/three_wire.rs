//! Three-wire session protocol for a radio behind a direct KFD adapter.
//!
//! ```text
//! KFD                                   MR
//! ── key signature (adapter 0x15) ──►   ◄── 0x25
//! ── ReadyRequest ──────────────────►   ◄── ReadyGeneralMode
//! ── KMM ───────────────────────────►   ◄── KMM          (× N)
//! ── TransferDone ──────────────────►   ◄── TransferDone
//! ── EndSession ────────────────────►   ◄── EndSessionAck
//! ── Disconnect ────────────────────►   ◄── DisconnectAck
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use kfd_core::protocol::kmm::{SessionControl, SessionOpcode};
use kfd_core::protocol::three_wire::{
    unwrap_kmm, wrap_kmm, ADAPTER_CMD_SEND_KEY_SIGNATURE, ADAPTER_RSP_SEND_KEY_SIGNATURE,
};
use kfd_core::{KmmBody, KmmMessage};
use tracing::{debug, info};

use super::expect_session_reply;
use crate::application::session::{RekeyError, SessionProtocol};
use crate::infrastructure::transport::FrameTransport;

/// [`SessionProtocol`] over a direct adapter.
pub struct ThreeWireProtocol {
    transport: Arc<dyn FrameTransport>,
}

impl ThreeWireProtocol {
    pub fn new(transport: Arc<dyn FrameTransport>) -> Self {
        Self { transport }
    }

    async fn send_body(&self, body: KmmBody) -> Result<(), RekeyError> {
        let kmm = KmmMessage::new(body).to_bytes()?;
        self.transport.send(&wrap_kmm(&kmm)?).await?;
        Ok(())
    }

    async fn receive_body(&self) -> Result<KmmBody, RekeyError> {
        let frame = self.transport.read_next_frame().await?;
        let kmm = unwrap_kmm(&frame)?;
        Ok(KmmMessage::parse(kmm)?.body)
    }

    async fn control(&self, send: SessionOpcode, expect: SessionOpcode) -> Result<(), RekeyError> {
        debug!(?send, "session control");
        self.send_body(KmmBody::SessionControl(SessionControl::from_kfd(send)))
            .await?;
        let reply = self.receive_body().await?;
        expect_session_reply(&reply, expect)
    }
}

#[async_trait]
impl SessionProtocol for ThreeWireProtocol {
    async fn init_session(&self) -> Result<(), RekeyError> {
        self.control(SessionOpcode::ReadyRequest, SessionOpcode::ReadyGeneralMode)
            .await?;
        info!("three-wire session open");
        Ok(())
    }

    async fn end_session(&self) -> Result<(), RekeyError> {
        self.control(SessionOpcode::TransferDone, SessionOpcode::TransferDone)
            .await?;
        self.control(SessionOpcode::EndSession, SessionOpcode::EndSessionAck)
            .await?;
        self.control(SessionOpcode::Disconnect, SessionOpcode::DisconnectAck)
            .await?;
        info!("three-wire session closed");
        Ok(())
    }

    async fn perform_kmm_transfer(&self, kmm: &[u8]) -> Result<Vec<u8>, RekeyError> {
        self.transport.send(&wrap_kmm(kmm)?).await?;
        let frame = self.transport.read_next_frame().await?;
        Ok(unwrap_kmm(&frame)?.to_vec())
    }

    async fn check_target_connection(&self) -> Result<(), RekeyError> {
        self.init_session().await?;
        self.end_session().await
    }

    async fn send_key_signature(&self) -> Result<(), RekeyError> {
        self.transport.send(&[ADAPTER_CMD_SEND_KEY_SIGNATURE]).await?;
        let reply = self.transport.read_next_frame().await?;
        if reply != [ADAPTER_RSP_SEND_KEY_SIGNATURE] {
            return Err(RekeyError::violation(
                format!("adapter response 0x{ADAPTER_RSP_SEND_KEY_SIGNATURE:02X}"),
                format!("{} byte(s) starting 0x{:02X}", reply.len(), reply.first().copied().unwrap_or(0)),
            ));
        }
        Ok(())
    }

    async fn send_disconnect(&self) -> Result<(), RekeyError> {
        self.send_body(KmmBody::SessionControl(SessionControl::from_kfd(
            SessionOpcode::Disconnect,
        )))
        .await
    }

    async fn clear_transport(&self) {
        self.transport.clear().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::{decode_three_wire_body, MockTransport};
    use kfd_core::protocol::kmm::SourceDevice;

    fn protocol(radio: Arc<MockTransport>) -> ThreeWireProtocol {
        ThreeWireProtocol::new(radio)
    }

    fn sent_opcodes(frames: &[Vec<u8>]) -> Vec<SessionOpcode> {
        frames
            .iter()
            .filter_map(|f| match decode_three_wire_body(f) {
                Some(KmmBody::SessionControl(sc)) => Some(sc.opcode),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_check_target_connection_runs_full_handshake() {
        // Arrange
        let radio = Arc::new(MockTransport::three_wire_radio(|_| None));
        let proto = protocol(Arc::clone(&radio));

        // Act
        proto.check_target_connection().await.unwrap();

        // Assert
        assert_eq!(
            sent_opcodes(&radio.sent_frames().await),
            vec![
                SessionOpcode::ReadyRequest,
                SessionOpcode::TransferDone,
                SessionOpcode::EndSession,
                SessionOpcode::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn test_key_signature_requires_adapter_ack() {
        let radio = Arc::new(MockTransport::with_responder(|_| vec![vec![0x99]]));
        let proto = protocol(radio);

        let err = proto.send_key_signature().await.unwrap_err();

        assert!(matches!(err, RekeyError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_wrong_ready_reply_is_protocol_violation() {
        // Arrange: the radio answers every command with DisconnectAck
        let reply = KmmMessage::new(KmmBody::SessionControl(SessionControl {
            opcode: SessionOpcode::DisconnectAck,
            source: SourceDevice::Mr,
        }))
        .to_bytes()
        .unwrap();
        let radio = Arc::new(MockTransport::with_responder(move |_| vec![wrap_kmm(&reply).unwrap()]));
        let proto = protocol(radio);

        // Act
        let err = proto.init_session().await.unwrap_err();

        // Assert
        assert!(matches!(err, RekeyError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_transfer_returns_reply_kmm() {
        // Arrange
        let radio = Arc::new(MockTransport::three_wire_radio(|body| match body {
            KmmBody::ZeroizeCommand => Some(KmmBody::ZeroizeResponse),
            _ => None,
        }));
        let proto = protocol(radio);
        let kmm = KmmMessage::new(KmmBody::ZeroizeCommand).to_bytes().unwrap();

        // Act
        let reply = proto.perform_kmm_transfer(&kmm).await.unwrap();

        // Assert
        assert_eq!(KmmMessage::parse(&reply).unwrap().body, KmmBody::ZeroizeResponse);
    }

    #[tokio::test]
    async fn test_corrupted_reply_frame_is_rejected() {
        let radio = Arc::new(MockTransport::with_responder(|_| vec![vec![0xC2, 0x00]]));
        let proto = protocol(radio);

        let err = proto.perform_kmm_transfer(&[0x21]).await.unwrap_err();

        assert!(matches!(err, RekeyError::ThreeWire(_)));
    }
}
