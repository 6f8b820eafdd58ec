//! Session protocol implementations.
//!
//! - **`three_wire`** – direct adapter link: KMMs travel in three-wire KMM
//!   frames and each session starts with the adapter key signature.
//! - **`dli`** – network relay link: KMMs carry the DLI preamble, with either
//!   the standard or the Motorola (MFID `0x90`) handshake.
//!
//! Both implement [`SessionProtocol`](crate::application::session::SessionProtocol).
//! A reply that is not the acknowledgment expected for the command just sent
//! is a protocol violation and fails the call.

pub mod dli;
pub mod three_wire;

pub use dli::{DliProtocol, DliVariant};
pub use three_wire::ThreeWireProtocol;

use kfd_core::protocol::kmm::{Mfid90Opcode, SessionOpcode};
use kfd_core::KmmBody;

use crate::application::session::RekeyError;

/// Short description of a received body for error messages.
pub(crate) fn describe(body: &KmmBody) -> String {
    match body {
        KmmBody::SessionControl(sc) => format!("SessionControl {:?}", sc.opcode),
        KmmBody::Mfid90SessionControl(sc) => format!("Mfid90SessionControl {:?}", sc.opcode),
        KmmBody::NegativeAcknowledgment(nak) => {
            format!("NegativeAcknowledgment ({})", nak.operation_status())
        }
        other => other.name().to_string(),
    }
}

/// Checks that `reply` is the standard session-control `expected` opcode.
pub(crate) fn expect_session_reply(reply: &KmmBody, expected: SessionOpcode) -> Result<(), RekeyError> {
    match reply {
        KmmBody::SessionControl(sc) if sc.opcode == expected => Ok(()),
        other => Err(RekeyError::violation(
            format!("SessionControl {expected:?}"),
            describe(other),
        )),
    }
}

/// Checks that `reply` is the Motorola session-control `expected` opcode.
pub(crate) fn expect_mfid90_reply(reply: &KmmBody, expected: Mfid90Opcode) -> Result<(), RekeyError> {
    match reply {
        KmmBody::Mfid90SessionControl(sc) if sc.opcode == expected => Ok(()),
        other => Err(RekeyError::violation(
            format!("Mfid90SessionControl {expected:?}"),
            describe(other),
        )),
    }
}
