//! Operation status codes reported by the radio.
//!
//! Status bytes appear in negative acknowledgments, rekey acknowledgments and
//! a few command responses.  Each known code has a short name and an
//! operator-facing reason.

use serde::{Deserialize, Serialize};

/// A decoded operation status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    CommandWasPerformed,
    CommandWasNotPerformed,
    ItemDoesNotExist,
    InvalidMessageId,
    InvalidMac,
    OutOfMemory,
    CouldNotDecryptTheMessage,
    InvalidMessageNumber,
    InvalidKeyId,
    InvalidAlgorithmId,
    InvalidMfid,
    ModuleFailure,
    MiAllZeros,
    Keyfail,
    InvalidWacnIdOrSystemId,
    InvalidSubscriberId,
    Unknown(u8),
}

impl OperationStatus {
    /// Looks up a status byte; unrecognised codes become [`OperationStatus::Unknown`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => OperationStatus::CommandWasPerformed,
            0x01 => OperationStatus::CommandWasNotPerformed,
            0x02 => OperationStatus::ItemDoesNotExist,
            0x03 => OperationStatus::InvalidMessageId,
            0x04 => OperationStatus::InvalidMac,
            0x05 => OperationStatus::OutOfMemory,
            0x06 => OperationStatus::CouldNotDecryptTheMessage,
            0x07 => OperationStatus::InvalidMessageNumber,
            0x08 => OperationStatus::InvalidKeyId,
            0x09 => OperationStatus::InvalidAlgorithmId,
            0x0A => OperationStatus::InvalidMfid,
            0x0B => OperationStatus::ModuleFailure,
            0x0C => OperationStatus::MiAllZeros,
            0x0D => OperationStatus::Keyfail,
            0x0E => OperationStatus::InvalidWacnIdOrSystemId,
            0x0F => OperationStatus::InvalidSubscriberId,
            other => OperationStatus::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            OperationStatus::CommandWasPerformed => 0x00,
            OperationStatus::CommandWasNotPerformed => 0x01,
            OperationStatus::ItemDoesNotExist => 0x02,
            OperationStatus::InvalidMessageId => 0x03,
            OperationStatus::InvalidMac => 0x04,
            OperationStatus::OutOfMemory => 0x05,
            OperationStatus::CouldNotDecryptTheMessage => 0x06,
            OperationStatus::InvalidMessageNumber => 0x07,
            OperationStatus::InvalidKeyId => 0x08,
            OperationStatus::InvalidAlgorithmId => 0x09,
            OperationStatus::InvalidMfid => 0x0A,
            OperationStatus::ModuleFailure => 0x0B,
            OperationStatus::MiAllZeros => 0x0C,
            OperationStatus::Keyfail => 0x0D,
            OperationStatus::InvalidWacnIdOrSystemId => 0x0E,
            OperationStatus::InvalidSubscriberId => 0x0F,
            OperationStatus::Unknown(code) => code,
        }
    }

    /// Short status name.
    pub fn name(self) -> &'static str {
        match self {
            OperationStatus::CommandWasPerformed => "Command was performed",
            OperationStatus::CommandWasNotPerformed => "Command not performed",
            OperationStatus::ItemDoesNotExist => "Item does not exist",
            OperationStatus::InvalidMessageId => "Invalid Message ID",
            OperationStatus::InvalidMac => "Invalid MAC",
            OperationStatus::OutOfMemory => "Out of Memory",
            OperationStatus::CouldNotDecryptTheMessage => "Could not decrypt the message",
            OperationStatus::InvalidMessageNumber => "Invalid Message Number",
            OperationStatus::InvalidKeyId => "Invalid Key ID",
            OperationStatus::InvalidAlgorithmId => "Invalid Algorithm ID",
            OperationStatus::InvalidMfid => "Invalid MFID",
            OperationStatus::ModuleFailure => "Module Failure",
            OperationStatus::MiAllZeros => "MI all zeros",
            OperationStatus::Keyfail => "Keyfail",
            OperationStatus::InvalidWacnIdOrSystemId => "Invalid WACN ID or System ID",
            OperationStatus::InvalidSubscriberId => "Invalid Subscriber ID",
            OperationStatus::Unknown(_) => "Unknown status",
        }
    }

    /// Operator-facing explanation of the status.
    pub fn reason(self) -> &'static str {
        match self {
            OperationStatus::CommandWasPerformed => "The radio completed the command.",
            OperationStatus::CommandWasNotPerformed => {
                "The radio was unable to carry out the command."
            }
            OperationStatus::ItemDoesNotExist => {
                "The key or keyset referenced by the command does not exist in the radio."
            }
            OperationStatus::InvalidMessageId => "The radio does not support this message.",
            OperationStatus::InvalidMac => "The message authentication code did not verify.",
            OperationStatus::OutOfMemory => "The radio has no free storage for the key.",
            OperationStatus::CouldNotDecryptTheMessage => {
                "The radio could not decrypt the message with the key it holds."
            }
            OperationStatus::InvalidMessageNumber => {
                "The message number is outside the radio's accepted window."
            }
            OperationStatus::InvalidKeyId => {
                "The key id is not valid for the algorithm or keyset it was sent with."
            }
            OperationStatus::InvalidAlgorithmId => "The radio does not support this algorithm.",
            OperationStatus::InvalidMfid => "The manufacturer id is not recognised by the radio.",
            OperationStatus::ModuleFailure => "The radio's encryption module reported a failure.",
            OperationStatus::MiAllZeros => "The message indicator was all zeros.",
            OperationStatus::Keyfail => "The radio's encryption module has erased its keys.",
            OperationStatus::InvalidWacnIdOrSystemId => {
                "The WACN id or system id does not match the radio's configuration."
            }
            OperationStatus::InvalidSubscriberId => {
                "The subscriber id does not match the radio's configuration."
            }
            OperationStatus::Unknown(_) => "The radio reported a status code this tool does not know.",
        }
    }

    pub fn is_success(self) -> bool {
        self == OperationStatus::CommandWasPerformed
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X}): {}", self.name(), self.code(), self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_round_trips() {
        for code in 0u8..=0xFF {
            assert_eq!(OperationStatus::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_invalid_key_id_name() {
        let status = OperationStatus::from_code(0x08);
        assert_eq!(status, OperationStatus::InvalidKeyId);
        assert_eq!(status.name(), "Invalid Key ID");
        assert!(status.to_string().contains("Invalid Key ID"));
    }

    #[test]
    fn test_codes_above_table_are_unknown() {
        assert_eq!(OperationStatus::from_code(0x10), OperationStatus::Unknown(0x10));
        assert_eq!(OperationStatus::from_code(0x10).name(), "Unknown status");
    }

    #[test]
    fn test_only_zero_is_success() {
        assert!(OperationStatus::from_code(0).is_success());
        assert!(!OperationStatus::from_code(1).is_success());
    }
}
