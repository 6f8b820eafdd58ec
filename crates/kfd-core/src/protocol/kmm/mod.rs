//! Key Management Message (KMM) codec.
//!
//! Envelope:
//! ```text
//! [message_id:1][length:2][format:1][dest_rsi:3][src_rsi:3][body:N]
//! ```
//! `length` counts everything after itself (`7 + N`).  The format byte
//! carries the response kind in bits 6–7; the low six bits (MAC and
//! encryption flags) must be zero.  Both RSIs are the `FF FF FF` placeholder.
//! Multi-byte integers are big-endian.
//!
//! # Decoding is strict (for beginners)
//!
//! Every body decoder checks the exact length implied by its item counts.
//! An unknown message id, an unknown inventory subtype or a single extra
//! byte is a hard [`KmmError`]; the codec never guesses.

pub mod body;
pub mod ids;
pub mod inventory;
pub mod preamble;
pub mod session_control;
pub mod status;
mod wire;

use thiserror::Error;

pub use body::{
    CapabilitiesResponse, ChangeRsiCommand, ChangeRsiResponse, KeyItem, KeysetChangeover, KeysetPair,
    KmmBody, LoadConfigCommand, LoadConfigResponse, ModifyKeyCommand, NegativeAcknowledgment,
    RekeyAcknowledgment,
};
pub use ids::{InventoryType, MessageId, ResponseKind, MFID_MOTOROLA, MFID_STANDARD};
pub use inventory::{InventoryCommand, InventoryResponse, KeyInfo, KeysetDateTime, KeysetInfo};
pub use preamble::{unwrap_preamble, wrap_preamble, PREAMBLE_LEN};
pub use session_control::{Mfid90Opcode, Mfid90SessionControl, SessionControl, SessionOpcode, SourceDevice};
pub use status::OperationStatus;

use wire::{read_u16, require_len};

/// Size of the fixed KMM header.
pub const KMM_HEADER_LEN: usize = 10;

/// Header bytes counted by the length field (format + two RSIs).
const LENGTH_FIELD_BASE: usize = 7;

/// Placeholder RSI used for both source and destination.
const PLACEHOLDER_RSI: [u8; 3] = [0xFF, 0xFF, 0xFF];

const FORMAT_FLAG_MASK: u8 = 0x3F;

/// Errors produced while encoding or decoding KMMs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KmmError {
    /// Fewer bytes than the fixed part of a field or body.
    #[error("{context}: need at least {needed} bytes, got {available}")]
    TooShort {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// The byte count disagrees with the count implied by the fields.
    #[error("{context}: length mismatch, expected {expected} bytes, got {actual}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown KMM message id 0x{0:02X}")]
    UnknownMessageId(u8),

    #[error("unknown inventory type 0x{0:02X}")]
    UnknownInventoryType(u8),

    #[error("{context}: unknown value 0x{value:02X}")]
    UnknownOpcode { context: &'static str, value: u8 },

    #[error("{context}: unsupported version 0x{value:02X}")]
    UnsupportedVersion { context: &'static str, value: u8 },

    /// The format byte requests MAC or encryption, or a reserved response kind.
    #[error("unsupported KMM format byte 0x{0:02X}")]
    UnsupportedFormat(u8),

    /// The body is encrypted; only clear KMMs are supported.
    #[error("encrypted KMM bodies are not supported")]
    UnsupportedEncryption,

    /// A field value does not fit its wire encoding.
    #[error("{field} out of range: {value}")]
    FieldOutOfRange { field: &'static str, value: u64 },

    /// A text field is not valid UTF-8.
    #[error("{context}: not valid UTF-8")]
    InvalidText { context: &'static str },

    /// Keys in one ModifyKeyCommand have different lengths.
    #[error("inconsistent key length: expected {expected} bytes, got {actual}")]
    InconsistentKeyLength { expected: usize, actual: usize },
}

/// A complete KMM: envelope fields plus a typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmmMessage {
    pub response_kind: ResponseKind,
    pub body: KmmBody,
}

impl KmmMessage {
    /// Wraps a body with the default response kind: commands ask for an
    /// immediate response, responses ask for none.
    pub fn new(body: KmmBody) -> Self {
        let response_kind = if body.is_command() {
            ResponseKind::Immediate
        } else {
            ResponseKind::None
        };
        Self {
            response_kind,
            body,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.body.message_id()
    }

    /// Encodes the envelope and body.
    ///
    /// # Errors
    ///
    /// Returns [`KmmError`] when a field does not fit its wire encoding.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kfd_core::protocol::kmm::{KmmBody, KmmMessage};
    ///
    /// let bytes = KmmMessage::new(KmmBody::ZeroizeCommand).to_bytes().unwrap();
    /// assert_eq!(bytes, vec![0x21, 0x00, 0x07, 0x80, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    /// ```
    pub fn to_bytes(&self) -> Result<Vec<u8>, KmmError> {
        let mut body = Vec::new();
        self.body.encode(&mut body)?;
        let length = LENGTH_FIELD_BASE + body.len();
        let length = u16::try_from(length).map_err(|_| KmmError::FieldOutOfRange {
            field: "KMM length",
            value: length as u64,
        })?;

        let mut buf = Vec::with_capacity(KMM_HEADER_LEN + body.len());
        buf.push(self.message_id() as u8);
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push((self.response_kind as u8) << 6);
        buf.extend_from_slice(&PLACEHOLDER_RSI);
        buf.extend_from_slice(&PLACEHOLDER_RSI);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes a standard-MFID KMM.
    ///
    /// # Errors
    ///
    /// Returns [`KmmError`] for any malformed, unknown or unsupported input.
    pub fn parse(bytes: &[u8]) -> Result<Self, KmmError> {
        Self::parse_with_mfid(bytes, MFID_STANDARD)
    }

    /// Decodes a KMM whose preamble carried `mfid`.
    ///
    /// # Errors
    ///
    /// Returns [`KmmError`] for any malformed, unknown or unsupported input.
    pub fn parse_with_mfid(bytes: &[u8], mfid: u8) -> Result<Self, KmmError> {
        require_len(bytes, KMM_HEADER_LEN, "KMM header")?;
        let message_id =
            MessageId::try_from(bytes[0]).map_err(|_| KmmError::UnknownMessageId(bytes[0]))?;

        let declared = usize::from(read_u16(bytes, 1)?);
        let actual = bytes.len() - 3;
        if declared != actual {
            return Err(KmmError::LengthMismatch {
                context: "KMM length field",
                expected: declared,
                actual,
            });
        }

        let format = bytes[3];
        if format & FORMAT_FLAG_MASK != 0 {
            return Err(KmmError::UnsupportedFormat(format));
        }
        let response_kind =
            ResponseKind::try_from(format >> 6).map_err(|_| KmmError::UnsupportedFormat(format))?;

        let body = KmmBody::decode(message_id, mfid, &bytes[KMM_HEADER_LEN..])?;
        Ok(Self {
            response_kind,
            body,
        })
    }
}

impl From<KmmBody> for KmmMessage {
    fn from(body: KmmBody) -> Self {
        KmmMessage::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_layout_for_inventory_command() {
        let msg = KmmMessage::new(KmmBody::InventoryCommand(InventoryCommand::ListMnp));

        let bytes = msg.to_bytes().unwrap();

        assert_eq!(
            bytes,
            vec![0x0D, 0x00, 0x08, 0x80, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xF8]
        );
    }

    #[test]
    fn test_responses_default_to_no_response() {
        let msg = KmmMessage::new(KmmBody::ZeroizeResponse);
        assert_eq!(msg.response_kind, ResponseKind::None);
        assert_eq!(msg.to_bytes().unwrap()[3], 0x00);
    }

    #[test]
    fn test_parse_rejects_unknown_message_id() {
        let bytes = [0x7E, 0x00, 0x07, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(KmmMessage::parse(&bytes), Err(KmmError::UnknownMessageId(0x7E)));
    }

    #[test]
    fn test_parse_rejects_length_field_mismatch() {
        let mut bytes = KmmMessage::new(KmmBody::ZeroizeResponse).to_bytes().unwrap();
        bytes[2] = 0x08;
        assert!(matches!(
            KmmMessage::parse(&bytes),
            Err(KmmError::LengthMismatch { expected: 8, actual: 7, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_mac_flags() {
        let mut bytes = KmmMessage::new(KmmBody::ZeroizeResponse).to_bytes().unwrap();
        bytes[3] = 0x01;
        assert_eq!(KmmMessage::parse(&bytes), Err(KmmError::UnsupportedFormat(0x01)));
    }

    #[test]
    fn test_parse_rejects_reserved_response_kind() {
        let mut bytes = KmmMessage::new(KmmBody::ZeroizeResponse).to_bytes().unwrap();
        bytes[3] = 0xC0;
        assert_eq!(KmmMessage::parse(&bytes), Err(KmmError::UnsupportedFormat(0xC0)));
    }

    #[test]
    fn test_parse_short_header() {
        assert!(matches!(
            KmmMessage::parse(&[0x21, 0x00]),
            Err(KmmError::TooShort { needed: 10, .. })
        ));
    }
}
