//! DLI session protocol for a radio reached through the network relay.
//!
//! Every KMM travels behind the 14-byte DLI preamble carrying the MFID and
//! clear-text placeholders for the message key.  Relays add latency, so
//! each handshake step is followed by a fixed settle delay.
//!
//! Two handshakes exist:
//!
//! ```text
//! Standard (MFID 0x00)              Motorola (MFID 0x90)
//! ReadyRequest → ReadyGeneralMode   Connect → ConnectAck
//!                                   BeginSession → BeginSessionAck
//!   … KMM transfers …                 … KMM transfers …
//! TransferDone → TransferDone       TransferDone → TransferDone
//! EndSession → EndSessionAck        EndSession → EndSessionAck
//! Disconnect → DisconnectAck        Disconnect → DisconnectAck
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kfd_core::protocol::kmm::{
    unwrap_preamble, wrap_preamble, Mfid90Opcode, Mfid90SessionControl, SessionControl,
    SessionOpcode, MFID_MOTOROLA, MFID_STANDARD,
};
use kfd_core::{KmmBody, KmmMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{expect_mfid90_reply, expect_session_reply};
use crate::application::session::{RekeyError, SessionProtocol};
use crate::infrastructure::transport::FrameTransport;

/// Which DLI handshake the radio expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DliVariant {
    #[default]
    Standard,
    Motorola,
}

impl DliVariant {
    pub fn mfid(self) -> u8 {
        match self {
            DliVariant::Standard => MFID_STANDARD,
            DliVariant::Motorola => MFID_MOTOROLA,
        }
    }
}

/// [`SessionProtocol`] over the network relay.
pub struct DliProtocol {
    transport: Arc<dyn FrameTransport>,
    variant: DliVariant,
    step_delay: Duration,
}

impl DliProtocol {
    pub fn new(transport: Arc<dyn FrameTransport>, variant: DliVariant, step_delay: Duration) -> Self {
        Self {
            transport,
            variant,
            step_delay,
        }
    }

    pub fn variant(&self) -> DliVariant {
        self.variant
    }

    async fn send_body(&self, body: KmmBody) -> Result<(), RekeyError> {
        let kmm = KmmMessage::new(body).to_bytes()?;
        self.transport
            .send(&wrap_preamble(self.variant.mfid(), &kmm))
            .await?;
        Ok(())
    }

    async fn receive_body(&self) -> Result<KmmBody, RekeyError> {
        let frame = self.transport.read_next_frame().await?;
        let (mfid, kmm) = unwrap_preamble(&frame)?;
        Ok(KmmMessage::parse_with_mfid(kmm, mfid)?.body)
    }

    /// One standard handshake step followed by the settle delay.
    async fn control(&self, send: SessionOpcode, expect: SessionOpcode) -> Result<(), RekeyError> {
        debug!(?send, "DLI session control");
        self.send_body(KmmBody::SessionControl(SessionControl::from_kfd(send)))
            .await?;
        let reply = self.receive_body().await?;
        expect_session_reply(&reply, expect)?;
        tokio::time::sleep(self.step_delay).await;
        Ok(())
    }

    /// One Motorola handshake step followed by the settle delay.
    async fn control_mfid90(&self, send: Mfid90Opcode, expect: Mfid90Opcode) -> Result<(), RekeyError> {
        debug!(?send, "DLI MFID 0x90 session control");
        self.send_body(KmmBody::Mfid90SessionControl(Mfid90SessionControl::from_kfd(send)))
            .await?;
        let reply = self.receive_body().await?;
        expect_mfid90_reply(&reply, expect)?;
        tokio::time::sleep(self.step_delay).await;
        Ok(())
    }
}

#[async_trait]
impl SessionProtocol for DliProtocol {
    async fn init_session(&self) -> Result<(), RekeyError> {
        match self.variant {
            DliVariant::Standard => {
                self.control(SessionOpcode::ReadyRequest, SessionOpcode::ReadyGeneralMode)
                    .await?;
            }
            DliVariant::Motorola => {
                self.control_mfid90(Mfid90Opcode::Connect, Mfid90Opcode::ConnectAck)
                    .await?;
                self.control_mfid90(Mfid90Opcode::BeginSession, Mfid90Opcode::BeginSessionAck)
                    .await?;
            }
        }
        info!(variant = ?self.variant, "DLI session open");
        Ok(())
    }

    async fn end_session(&self) -> Result<(), RekeyError> {
        match self.variant {
            DliVariant::Standard => {
                self.control(SessionOpcode::TransferDone, SessionOpcode::TransferDone)
                    .await?;
                self.control(SessionOpcode::EndSession, SessionOpcode::EndSessionAck)
                    .await?;
                self.control(SessionOpcode::Disconnect, SessionOpcode::DisconnectAck)
                    .await?;
            }
            DliVariant::Motorola => {
                self.control_mfid90(Mfid90Opcode::TransferDone, Mfid90Opcode::TransferDone)
                    .await?;
                self.control_mfid90(Mfid90Opcode::EndSession, Mfid90Opcode::EndSessionAck)
                    .await?;
                self.control_mfid90(Mfid90Opcode::Disconnect, Mfid90Opcode::DisconnectAck)
                    .await?;
            }
        }
        info!(variant = ?self.variant, "DLI session closed");
        Ok(())
    }

    async fn perform_kmm_transfer(&self, kmm: &[u8]) -> Result<Vec<u8>, RekeyError> {
        self.transport
            .send(&wrap_preamble(self.variant.mfid(), kmm))
            .await?;
        let frame = self.transport.read_next_frame().await?;
        let (mfid, reply) = unwrap_preamble(&frame)?;
        if mfid != self.variant.mfid() {
            debug!(mfid, "reply carries a different MFID");
        }
        Ok(reply.to_vec())
    }

    async fn check_target_connection(&self) -> Result<(), RekeyError> {
        self.init_session().await?;
        self.end_session().await
    }

    async fn send_key_signature(&self) -> Result<(), RekeyError> {
        // The relay has no adapter to sign.
        Ok(())
    }

    async fn send_disconnect(&self) -> Result<(), RekeyError> {
        let body = match self.variant {
            DliVariant::Standard => {
                KmmBody::SessionControl(SessionControl::from_kfd(SessionOpcode::Disconnect))
            }
            DliVariant::Motorola => KmmBody::Mfid90SessionControl(Mfid90SessionControl::from_kfd(
                Mfid90Opcode::Disconnect,
            )),
        };
        self.send_body(body).await
    }

    async fn clear_transport(&self) {
        self.transport.clear().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::{decode_dli_body, MockTransport};

    const STEP: Duration = Duration::from_millis(300);

    #[tokio::test(start_paused = true)]
    async fn test_motorola_handshake_order_and_mfid() {
        // Arrange
        let radio = Arc::new(MockTransport::dli_radio(|_| None));
        let proto = DliProtocol::new(radio.clone(), DliVariant::Motorola, STEP);

        // Act
        proto.check_target_connection().await.unwrap();

        // Assert
        let sent: Vec<(u8, Mfid90Opcode)> = radio
            .sent_frames()
            .await
            .iter()
            .filter_map(|f| match decode_dli_body(f) {
                Some((mfid, KmmBody::Mfid90SessionControl(sc))) => Some((mfid, sc.opcode)),
                _ => None,
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                (MFID_MOTOROLA, Mfid90Opcode::Connect),
                (MFID_MOTOROLA, Mfid90Opcode::BeginSession),
                (MFID_MOTOROLA, Mfid90Opcode::TransferDone),
                (MFID_MOTOROLA, Mfid90Opcode::EndSession),
                (MFID_MOTOROLA, Mfid90Opcode::Disconnect),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_step_waits_settle_delay() {
        // Arrange
        let radio = Arc::new(MockTransport::dli_radio(|_| None));
        let proto = DliProtocol::new(radio, DliVariant::Motorola, STEP);
        let start = tokio::time::Instant::now();

        // Act
        proto.init_session().await.unwrap();

        // Assert: two steps, two delays
        assert!(start.elapsed() >= STEP * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_variant_uses_ready_request() {
        let radio = Arc::new(MockTransport::dli_radio(|_| None));
        let proto = DliProtocol::new(radio.clone(), DliVariant::Standard, STEP);

        proto.init_session().await.unwrap();

        let first = radio.sent_frames().await[0].clone();
        assert!(matches!(
            decode_dli_body(&first),
            Some((MFID_STANDARD, KmmBody::SessionControl(SessionControl {
                opcode: SessionOpcode::ReadyRequest,
                ..
            })))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_signature_is_a_no_op() {
        let radio = Arc::new(MockTransport::silent());
        let proto = DliProtocol::new(radio.clone(), DliVariant::Standard, STEP);

        proto.send_key_signature().await.unwrap();

        assert!(radio.sent_frames().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_strips_preamble_from_reply() {
        // Arrange
        let radio = Arc::new(MockTransport::dli_radio(|body| match body {
            KmmBody::ZeroizeCommand => Some(KmmBody::ZeroizeResponse),
            _ => None,
        }));
        let proto = DliProtocol::new(radio, DliVariant::Motorola, STEP);
        let kmm = KmmMessage::new(KmmBody::ZeroizeCommand).to_bytes().unwrap();

        // Act
        let reply = proto.perform_kmm_transfer(&kmm).await.unwrap();

        // Assert
        assert_eq!(KmmMessage::parse(&reply).unwrap().body, KmmBody::ZeroizeResponse);
    }
}
