//! Data Link Independent preamble prepended to KMMs on relayed links.
//!
//! ```text
//! [version=0x00][mfid][alg_id=0x80][key_id:2=0][mi:9=0][kmm:N]
//! ```
//! The crypto fields are clear-text placeholders; relayed KMMs are never
//! encrypted.

use super::wire::require_len;
use super::KmmError;

/// Preamble length in bytes.
pub const PREAMBLE_LEN: usize = 14;

const PREAMBLE_VERSION: u8 = 0x00;
const CLEAR_ALGORITHM: u8 = 0x80;
const MI_LEN: usize = 9;

/// Prepends a clear preamble for `mfid` to an encoded KMM.
pub fn wrap_preamble(mfid: u8, kmm: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREAMBLE_LEN + kmm.len());
    buf.extend_from_slice(&[PREAMBLE_VERSION, mfid, CLEAR_ALGORITHM, 0x00, 0x00]);
    buf.extend_from_slice(&[0u8; MI_LEN]);
    buf.extend_from_slice(kmm);
    buf
}

/// Splits a preamble-wrapped frame into its MFID and the KMM bytes.
///
/// # Errors
///
/// - [`KmmError::TooShort`] when the frame cannot hold a preamble.
/// - [`KmmError::UnsupportedVersion`] when the version byte is not zero.
/// - [`KmmError::UnsupportedEncryption`] when the algorithm is not clear.
pub fn unwrap_preamble(frame: &[u8]) -> Result<(u8, &[u8]), KmmError> {
    require_len(frame, PREAMBLE_LEN, "DLI preamble")?;
    if frame[0] != PREAMBLE_VERSION {
        return Err(KmmError::UnsupportedVersion {
            context: "DLI preamble",
            value: frame[0],
        });
    }
    if frame[2] != CLEAR_ALGORITHM {
        return Err(KmmError::UnsupportedEncryption);
    }
    Ok((frame[1], &frame[PREAMBLE_LEN..]))
}
