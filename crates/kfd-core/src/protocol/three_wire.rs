//! Three-wire interface KMM framing used on the direct (adapter) transport.
//!
//! Wire format of one KMM frame:
//! ```text
//! [opcode=0xC2][len:2][control:1][dest_rsi:3][kmm:N][crc:2]
//! ```
//! `len` counts everything after itself (control + RSI + KMM + CRC).  The CRC
//! covers control, destination RSI and the KMM, and is sent big-endian.

use thiserror::Error;

/// Opcode that introduces a KMM frame on the three-wire interface.
pub const OPCODE_KMM: u8 = 0xC2;

/// Adapter command asking the adapter to emit the key signature on the wire.
pub const ADAPTER_CMD_SEND_KEY_SIGNATURE: u8 = 0x15;

/// Adapter acknowledgment for [`ADAPTER_CMD_SEND_KEY_SIGNATURE`].
pub const ADAPTER_RSP_SEND_KEY_SIGNATURE: u8 = 0x25;

/// Control byte; always zero for manual rekey traffic.
const CONTROL: u8 = 0x00;

/// Broadcast destination RSI.
const DEST_RSI: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Bytes between the length field and the KMM (control + RSI).
const PREFIX_LEN: usize = 4;

/// Opcode + length field.
const HEADER_LEN: usize = 3;

/// Errors produced when unwrapping a three-wire KMM frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThreeWireError {
    /// The frame is too short to contain the fixed fields.
    #[error("three-wire frame too short: {0} bytes")]
    TooShort(usize),

    /// The first byte is not [`OPCODE_KMM`].
    #[error("unexpected three-wire opcode 0x{0:02X}")]
    UnexpectedOpcode(u8),

    /// The length field disagrees with the number of bytes received.
    #[error("three-wire length mismatch: header says {declared}, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The control byte is not zero.
    #[error("unexpected three-wire control byte 0x{0:02X}")]
    UnexpectedControl(u8),

    /// The checksum does not match the frame contents.
    #[error("three-wire CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// The KMM does not fit the 16-bit length field.
    #[error("KMM of {0} bytes is too long for a three-wire frame")]
    TooLong(usize),
}

/// Wraps an encoded KMM in a three-wire KMM frame.
///
/// # Errors
///
/// Returns [`ThreeWireError::TooLong`] when the frame length does not fit in
/// 16 bits.
pub fn wrap_kmm(kmm: &[u8]) -> Result<Vec<u8>, ThreeWireError> {
    let length = PREFIX_LEN + kmm.len() + 2;
    let encoded_length = u16::try_from(length).map_err(|_| ThreeWireError::TooLong(kmm.len()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + length);
    frame.push(OPCODE_KMM);
    frame.extend_from_slice(&encoded_length.to_be_bytes());
    frame.push(CONTROL);
    frame.extend_from_slice(&DEST_RSI);
    frame.extend_from_slice(kmm);
    let crc = crc16_ccitt(&frame[HEADER_LEN..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Extracts the KMM carried by a three-wire KMM frame.
///
/// # Errors
///
/// Returns a [`ThreeWireError`] describing the first check that failed.
pub fn unwrap_kmm(frame: &[u8]) -> Result<&[u8], ThreeWireError> {
    if frame.len() < HEADER_LEN + PREFIX_LEN + 2 {
        return Err(ThreeWireError::TooShort(frame.len()));
    }
    if frame[0] != OPCODE_KMM {
        return Err(ThreeWireError::UnexpectedOpcode(frame[0]));
    }
    let declared = u16::from_be_bytes([frame[1], frame[2]]) as usize;
    let actual = frame.len() - HEADER_LEN;
    if declared != actual {
        return Err(ThreeWireError::LengthMismatch { declared, actual });
    }
    if frame[3] != CONTROL {
        return Err(ThreeWireError::UnexpectedControl(frame[3]));
    }
    let crc_offset = frame.len() - 2;
    let expected = crc16_ccitt(&frame[HEADER_LEN..crc_offset]);
    let received = u16::from_be_bytes([frame[crc_offset], frame[crc_offset + 1]]);
    if expected != received {
        return Err(ThreeWireError::CrcMismatch {
            expected,
            actual: received,
        });
    }
    Ok(&frame[HEADER_LEN + PREFIX_LEN..crc_offset])
}

/// CRC-16/CCITT with polynomial 0x1021, initial value 0xFFFF and the result
/// inverted.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_then_unwrap_returns_original_kmm() {
        let kmm = [0x31, 0x00, 0x0A, 0x80, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x01, 0x01];
        let frame = wrap_kmm(&kmm).unwrap();
        assert_eq!(unwrap_kmm(&frame), Ok(&kmm[..]));
    }

    #[test]
    fn test_wrapped_frame_layout() {
        let frame = wrap_kmm(&[0xAB]).unwrap();
        assert_eq!(frame[0], OPCODE_KMM);
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 7);
        assert_eq!(&frame[3..7], &[0x00, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame[7], 0xAB);
        assert_eq!(frame.len(), 10);
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut frame = wrap_kmm(&[0x01, 0x02, 0x03]).unwrap();
        frame[8] ^= 0xFF;
        assert!(matches!(
            unwrap_kmm(&frame),
            Err(ThreeWireError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_opcode_is_rejected() {
        let mut frame = wrap_kmm(&[0x01]).unwrap();
        frame[0] = 0xC0;
        assert_eq!(unwrap_kmm(&frame), Err(ThreeWireError::UnexpectedOpcode(0xC0)));
    }

    #[test]
    fn test_truncated_frame_reports_length_mismatch() {
        let frame = wrap_kmm(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        let truncated = &frame[..frame.len() - 1];
        assert!(matches!(
            unwrap_kmm(truncated),
            Err(ThreeWireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_kmm_is_refused() {
        let kmm = vec![0u8; 65_530];
        assert_eq!(wrap_kmm(&kmm), Err(ThreeWireError::TooLong(65_530)));
    }

    #[test]
    fn test_largest_kmm_still_fits() {
        let kmm = vec![0u8; 65_529];
        let frame = wrap_kmm(&kmm).unwrap();
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 0xFFFF);
    }

    #[test]
    fn test_crc_known_vector() {
        // CRC-16/GENIBUS check value for "123456789".
        assert_eq!(crc16_ccitt(b"123456789"), 0xD64E);
    }
}
