//! Session protocol contract, rekey errors and communication recovery.
//!
//! # Session lifecycle (for beginners)
//!
//! Every exchange with a radio happens inside a session:
//!
//! ```text
//! send_key_signature ──► init_session ──► perform_kmm_transfer × N ──► end_session
//!        (direct only)      (handshake)         (one KMM each way)        (teardown)
//! ```
//!
//! [`SessionProtocol`] hides *how* the handshake and the KMM envelope look on
//! a given link (direct three-wire adapter or DLI over the network relay).
//! The orchestration in `manual_rekey` only ever talks to this trait, so it
//! can be tested with a mock protocol.
//!
//! # Recovery
//!
//! A radio left mid-transaction by an aborted session ignores a fresh
//! `ReadyRequest` until it has been disconnected.  Between initialization
//! attempts the engine therefore clears the packet queue, sends `Disconnect`
//! twice and waits an escalating settle time.  [`TransportRecovery`] also
//! throttles these resets so a merely slow radio is not stormed with them.

use std::time::Duration;

use async_trait::async_trait;
use kfd_core::protocol::three_wire::ThreeWireError;
use kfd_core::{DomainError, KmmError, OperationStatus, PartitionError};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::infrastructure::transport::TransportError;

/// Error type for session and orchestration operations.
#[derive(Debug, Error)]
pub enum RekeyError {
    /// The radio answered with something other than the expected reply.
    #[error("protocol violation: expected {expected}, received {received}")]
    ProtocolViolation { expected: String, received: String },

    /// No frame arrived within the read window.
    #[error("communication timeout: no reply within {0:?}")]
    CommunicationTimeout(Duration),

    /// The radio rejected a command with a negative acknowledgment.
    #[error("radio rejected {command}: {status}")]
    NegativeAcknowledgment {
        command: &'static str,
        status: OperationStatus,
    },

    /// A response carried a non-success status.
    #[error("{operation} failed: {status}")]
    OperationFailed {
        operation: &'static str,
        status: OperationStatus,
    },

    /// Another session is already open on this engine.
    #[error("a session is already open")]
    SessionBusy,

    #[error(transparent)]
    Transport(TransportError),

    #[error("KMM codec error: {0}")]
    Kmm(#[from] KmmError),

    #[error("three-wire frame error: {0}")]
    ThreeWire(#[from] ThreeWireError),

    #[error("cannot batch keys: {0}")]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<TransportError> for RekeyError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::CommunicationTimeout(window) => RekeyError::CommunicationTimeout(window),
            other => RekeyError::Transport(other),
        }
    }
}

impl RekeyError {
    /// Builds a [`RekeyError::ProtocolViolation`].
    pub fn violation(expected: impl Into<String>, received: impl Into<String>) -> Self {
        RekeyError::ProtocolViolation {
            expected: expected.into(),
            received: received.into(),
        }
    }
}

/// Link-specific session handling.
///
/// Implementations: `ThreeWireProtocol` (direct adapter) and `DliProtocol`
/// (network relay, standard or Motorola handshake).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProtocol: Send + Sync {
    /// Runs the opening handshake.
    async fn init_session(&self) -> Result<(), RekeyError>;

    /// Runs the closing handshake.
    async fn end_session(&self) -> Result<(), RekeyError>;

    /// Sends one encoded KMM and returns the encoded KMM received in reply.
    async fn perform_kmm_transfer(&self, kmm: &[u8]) -> Result<Vec<u8>, RekeyError>;

    /// Opens and closes a session without any payload, as a liveness probe.
    async fn check_target_connection(&self) -> Result<(), RekeyError>;

    /// Asks the adapter to send its key signature.  No-op on relayed links.
    async fn send_key_signature(&self) -> Result<(), RekeyError>;

    /// Sends a disconnect without waiting for the acknowledgment.
    async fn send_disconnect(&self) -> Result<(), RekeyError>;

    /// Drops every queued and partially received frame.
    async fn clear_transport(&self);
}

// ── Recovery ──────────────────────────────────────────────────────────────────

/// Timing of session initialization and transfer retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Initialization attempts before giving up.
    pub init_attempts: u32,
    /// Attempts per KMM transfer before a timeout surfaces.
    pub transfer_attempts: u32,
    /// Settle time after the first failed attempt; later attempts wait
    /// multiples of it.
    pub settle: Duration,
    /// Gap after each disconnect of a reset.
    pub disconnect_gap: Duration,
    /// Disconnects sent per reset.
    pub disconnect_repeats: u32,
    /// Minimum time between two resets.
    pub reset_throttle: Duration,
}

impl RecoveryPolicy {
    /// Settle time after failed attempt `attempt` (1-based).
    pub fn settle_after(&self, attempt: u32) -> Duration {
        self.settle * attempt
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            init_attempts: 3,
            transfer_attempts: 3,
            settle: Duration::from_millis(300),
            disconnect_gap: Duration::from_millis(100),
            disconnect_repeats: 2,
            reset_throttle: Duration::from_secs(3),
        }
    }
}

/// Performs transport resets, suppressing repeats inside the throttle window.
#[derive(Debug)]
pub struct TransportRecovery {
    policy: RecoveryPolicy,
    last_reset: Option<Instant>,
}

impl TransportRecovery {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            last_reset: None,
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Records a reset at `now` unless the previous one is too recent.
    pub fn try_begin_reset(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_reset {
            if now.saturating_duration_since(last) < self.policy.reset_throttle {
                return false;
            }
        }
        self.last_reset = Some(now);
        true
    }

    /// Clears the transport and, unless throttled, sends the disconnect burst.
    ///
    /// Returns `true` when the disconnect burst was sent.  Send failures are
    /// logged and otherwise ignored: the reset is best effort.
    pub async fn reset(&mut self, protocol: &dyn SessionProtocol) -> bool {
        protocol.clear_transport().await;
        if !self.try_begin_reset(Instant::now()) {
            debug!("transport reset suppressed by throttle");
            return false;
        }
        self.send_disconnects(protocol).await;
        true
    }

    /// Clears the transport and sends the disconnect burst regardless of the
    /// throttle window.  The reset still counts towards the throttle.
    ///
    /// Used between session initialization attempts, whose settle delays are
    /// shorter than the throttle window.
    pub async fn force_reset(&mut self, protocol: &dyn SessionProtocol) {
        protocol.clear_transport().await;
        self.last_reset = Some(Instant::now());
        self.send_disconnects(protocol).await;
    }

    async fn send_disconnects(&self, protocol: &dyn SessionProtocol) {
        warn!("resetting radio link");
        for _ in 0..self.policy.disconnect_repeats {
            if let Err(e) = protocol.send_disconnect().await {
                warn!("disconnect during reset failed: {e}");
            }
            tokio::time::sleep(self.policy.disconnect_gap).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
