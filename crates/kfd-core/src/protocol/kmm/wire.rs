//! Byte-level helpers shared by the KMM body codecs.

use super::KmmError;
use crate::domain::Rsi;

pub(super) fn require_len(buf: &[u8], needed: usize, context: &'static str) -> Result<(), KmmError> {
    if buf.len() < needed {
        return Err(KmmError::TooShort {
            context,
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Fails unless `buf` is exactly `expected` bytes long.
pub(super) fn require_exact(
    buf: &[u8],
    expected: usize,
    context: &'static str,
) -> Result<(), KmmError> {
    if buf.len() != expected {
        return Err(KmmError::LengthMismatch {
            context,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

pub(super) fn read_u16(buf: &[u8], offset: usize) -> Result<u16, KmmError> {
    require_len(buf, offset + 2, "u16 field")?;
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

pub(super) fn read_u24(buf: &[u8], offset: usize) -> Result<u32, KmmError> {
    require_len(buf, offset + 3, "u24 field")?;
    Ok(u32::from_be_bytes([0, buf[offset], buf[offset + 1], buf[offset + 2]]))
}

pub(super) fn read_rsi(buf: &[u8], offset: usize) -> Result<Rsi, KmmError> {
    require_len(buf, offset + 3, "RSI field")?;
    Ok(Rsi::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2]]))
}

pub(super) fn write_u24(buf: &mut Vec<u8>, value: u32, field: &'static str) -> Result<(), KmmError> {
    if value > 0x00FF_FFFF {
        return Err(KmmError::FieldOutOfRange {
            field,
            value: value.into(),
        });
    }
    buf.extend_from_slice(&value.to_be_bytes()[1..]);
    Ok(())
}

/// Converts a collection length to a one-byte count.
pub(super) fn count_u8(len: usize, field: &'static str) -> Result<u8, KmmError> {
    u8::try_from(len).map_err(|_| KmmError::FieldOutOfRange {
        field,
        value: len as u64,
    })
}

/// Converts a collection length to a two-byte count.
pub(super) fn count_u16(len: usize, field: &'static str) -> Result<u16, KmmError> {
    u16::try_from(len).map_err(|_| KmmError::FieldOutOfRange {
        field,
        value: len as u64,
    })
}
