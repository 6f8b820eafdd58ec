//! Key validation heuristics and DES parity helpers.
//!
//! [`validate_key`] separates hard errors (the radio would reject the key or
//! the key is malformed) from warnings (the key loads but looks weak or
//! guessable).  Callers must opt in explicitly before accepting a key that
//! produced warnings.

use thiserror::Error;

use crate::domain::algorithm::{AlgorithmId, TYPE1_MAX};
use crate::domain::key_item::check_range;
use crate::domain::DomainError;

/// Crypto groups whose SLNs are normally used for manual rekey.
const EXPECTED_CRYPTO_GROUPS: [u16; 2] = [0x0, 0xF];

/// A key that cannot be loaded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyValidationError {
    #[error(transparent)]
    OutOfRange(#[from] DomainError),

    #[error("algorithm 0x80 (clear) cannot be loaded as a key")]
    ClearAlgorithm,

    #[error("algorithm 0x{algorithm_id:02X} requires a {expected}-byte key, got {actual} bytes")]
    WrongKeyLength {
        algorithm_id: u8,
        expected: usize,
        actual: usize,
    },

    #[error("DES key has incorrect parity")]
    InvalidParity,
}

/// A key that loads but deserves a second look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWarning {
    /// Type 1 algorithm; the key bytes were not checked.
    Type1Algorithm(u8),
    /// Algorithm id with no known key rules.
    UnknownAlgorithm(u8),
    WeakDesKey,
    SemiWeakDesKey,
    GuessableKey,
    SlnZero,
    /// The SLN is outside crypto groups 0 and 15.
    UnusualCryptoGroup { sln: u16 },
}

impl std::fmt::Display for KeyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyWarning::Type1Algorithm(alg) => {
                write!(f, "algorithm 0x{alg:02X} is a Type 1 algorithm; key not checked")
            }
            KeyWarning::UnknownAlgorithm(alg) => {
                write!(f, "algorithm 0x{alg:02X} is not recognised; key not checked")
            }
            KeyWarning::WeakDesKey => write!(f, "key is a known weak DES key"),
            KeyWarning::SemiWeakDesKey => write!(f, "key is a known semi-weak DES key"),
            KeyWarning::GuessableKey => write!(f, "key is easily guessable"),
            KeyWarning::SlnZero => write!(f, "SLN 0 is reserved on many radios"),
            KeyWarning::UnusualCryptoGroup { sln } => write!(
                f,
                "SLN {sln} is in crypto group {}; expected group 0 or 15",
                sln >> 12
            ),
        }
    }
}

// ── Known key tables ──────────────────────────────────────────────────────────

const DES_WEAK_KEYS: [[u8; 8]; 4] = [
    [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01],
    [0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE],
    [0xE0, 0xE0, 0xE0, 0xE0, 0xF1, 0xF1, 0xF1, 0xF1],
    [0x1F, 0x1F, 0x1F, 0x1F, 0x0E, 0x0E, 0x0E, 0x0E],
];

const DES_SEMI_WEAK_KEYS: [[u8; 8]; 12] = [
    [0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE],
    [0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01],
    [0x1F, 0xE0, 0x1F, 0xE0, 0x0E, 0xF1, 0x0E, 0xF1],
    [0xE0, 0x1F, 0xE0, 0x1F, 0xF1, 0x0E, 0xF1, 0x0E],
    [0x01, 0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1],
    [0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1, 0x01],
    [0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E, 0xFE],
    [0xFE, 0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E],
    [0x01, 0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E],
    [0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E, 0x01],
    [0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1, 0xFE],
    [0xFE, 0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1],
];

const DES_GUESSABLE_KEYS: [[u8; 8]; 2] = [
    [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF],
    [0xFE, 0xDC, 0xBA, 0x98, 0x76, 0x54, 0x32, 0x10],
];

const ADP_GUESSABLE_KEYS: [[u8; 5]; 3] = [
    [0x00, 0x00, 0x00, 0x00, 0x00],
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0x01, 0x23, 0x45, 0x67, 0x89],
];

// ── Validation ────────────────────────────────────────────────────────────────

/// Checks a key against field ranges and per-algorithm rules.
///
/// Returns the (possibly empty) list of warnings for a loadable key.
///
/// # Errors
///
/// Returns [`KeyValidationError`] for out-of-range fields, the clear
/// algorithm, a wrong key length or bad DES parity.
///
/// # Examples
///
/// ```rust
/// use kfd_core::container::validate::{validate_key, KeyWarning};
///
/// let warnings = validate_key(1, 1, 1, 0x84, &[0u8; 32]).unwrap();
/// assert_eq!(warnings, vec![KeyWarning::GuessableKey]);
/// assert!(validate_key(1, 1, 1, 0x80, &[0u8; 8]).is_err());
/// ```
pub fn validate_key(
    keyset_id: u32,
    sln: u32,
    key_id: u32,
    algorithm_id: u32,
    key: &[u8],
) -> Result<Vec<KeyWarning>, KeyValidationError> {
    check_range("keyset_id", keyset_id.into(), 1, 255)?;
    check_range("sln", sln.into(), 0, 0xFFFF)?;
    check_range("key_id", key_id.into(), 0, 0xFFFF)?;
    check_range("algorithm_id", algorithm_id.into(), 0, 0xFF)?;
    let sln = sln as u16;
    let algorithm_id = algorithm_id as u8;

    let mut warnings = Vec::new();
    if sln == 0 {
        warnings.push(KeyWarning::SlnZero);
    } else if !EXPECTED_CRYPTO_GROUPS.contains(&(sln >> 12)) {
        warnings.push(KeyWarning::UnusualCryptoGroup { sln });
    }

    if algorithm_id <= TYPE1_MAX {
        warnings.push(KeyWarning::Type1Algorithm(algorithm_id));
        return Ok(warnings);
    }

    match AlgorithmId::from_u8(algorithm_id) {
        Some(AlgorithmId::Clear) => return Err(KeyValidationError::ClearAlgorithm),
        Some(AlgorithmId::DesOfb) | Some(AlgorithmId::DesXl) => {
            require_length(algorithm_id, key, 8)?;
            if !is_valid_parity(key) {
                return Err(KeyValidationError::InvalidParity);
            }
            if DES_WEAK_KEYS.iter().any(|k| k[..] == *key) {
                warnings.push(KeyWarning::WeakDesKey);
            } else if DES_SEMI_WEAK_KEYS.iter().any(|k| k[..] == *key) {
                warnings.push(KeyWarning::SemiWeakDesKey);
            } else if DES_GUESSABLE_KEYS.iter().any(|k| k[..] == *key) {
                warnings.push(KeyWarning::GuessableKey);
            }
        }
        Some(AlgorithmId::TripleDes) => {
            require_length(algorithm_id, key, 24)?;
            if !is_valid_parity(key) {
                return Err(KeyValidationError::InvalidParity);
            }
        }
        Some(AlgorithmId::Aes256) => {
            require_length(algorithm_id, key, 32)?;
            if is_guessable_aes(key) {
                warnings.push(KeyWarning::GuessableKey);
            }
        }
        Some(AlgorithmId::Aes128) => {
            require_length(algorithm_id, key, 16)?;
        }
        Some(AlgorithmId::Adp) => {
            require_length(algorithm_id, key, 5)?;
            if ADP_GUESSABLE_KEYS.iter().any(|k| k[..] == *key) {
                warnings.push(KeyWarning::GuessableKey);
            }
        }
        None => warnings.push(KeyWarning::UnknownAlgorithm(algorithm_id)),
    }

    Ok(warnings)
}

fn require_length(algorithm_id: u8, key: &[u8], expected: usize) -> Result<(), KeyValidationError> {
    if key.len() != expected {
        return Err(KeyValidationError::WrongKeyLength {
            algorithm_id,
            expected,
            actual: key.len(),
        });
    }
    Ok(())
}

/// All zeros, all ones, or a byte counter.
fn is_guessable_aes(key: &[u8]) -> bool {
    let all_same = key.iter().all(|&b| b == 0x00) || key.iter().all(|&b| b == 0xFF);
    let counting = key.iter().enumerate().all(|(i, &b)| b as usize == i)
        || key.iter().enumerate().all(|(i, &b)| b as usize == i + 1);
    all_same || counting
}

// ── DES parity ────────────────────────────────────────────────────────────────

/// `true` when every byte has an odd number of set bits.
pub fn is_valid_parity(key: &[u8]) -> bool {
    key.iter().all(|b| b.count_ones() % 2 == 1)
}

/// Sets the low bit of each byte so that every byte has odd parity.
///
/// ```rust
/// use kfd_core::container::validate::{fix_parity, is_valid_parity};
///
/// let fixed = fix_parity(&[0x00, 0x03, 0xFF]);
/// assert_eq!(fixed, vec![0x01, 0x02, 0xFE]);
/// assert!(is_valid_parity(&fixed));
/// ```
pub fn fix_parity(key: &[u8]) -> Vec<u8> {
    key.iter()
        .map(|&b| {
            let high = b & 0xFE;
            if high.count_ones() % 2 == 0 {
                high | 0x01
            } else {
                high
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_DES: [u8; 8] = [0x13, 0x34, 0x57, 0x79, 0x9B, 0xBC, 0xDF, 0xF1];

    #[test]
    fn test_good_des_key_has_no_warnings() {
        assert!(is_valid_parity(&GOOD_DES));
        assert_eq!(validate_key(1, 1, 1, 0x81, &GOOD_DES), Ok(vec![]));
    }

    #[test]
    fn test_clear_algorithm_is_rejected() {
        assert_eq!(
            validate_key(1, 1, 1, 0x80, &GOOD_DES),
            Err(KeyValidationError::ClearAlgorithm)
        );
    }

    #[test]
    fn test_out_of_range_fields_are_errors() {
        assert!(matches!(
            validate_key(0, 1, 1, 0x84, &[1; 32]),
            Err(KeyValidationError::OutOfRange(_))
        ));
        assert!(matches!(
            validate_key(1, 0x1_0000, 1, 0x84, &[1; 32]),
            Err(KeyValidationError::OutOfRange(_))
        ));
        assert!(matches!(
            validate_key(1, 1, 1, 0x100, &[1; 32]),
            Err(KeyValidationError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_type1_bypasses_byte_checks_with_warning() {
        assert_eq!(
            validate_key(1, 1, 1, 0x01, &[0x00; 3]),
            Ok(vec![KeyWarning::Type1Algorithm(0x01)])
        );
    }

    #[test]
    fn test_des_requires_eight_bytes_and_parity() {
        assert_eq!(
            validate_key(1, 1, 1, 0x9F, &[0x01; 7]),
            Err(KeyValidationError::WrongKeyLength {
                algorithm_id: 0x9F,
                expected: 8,
                actual: 7
            })
        );
        assert_eq!(
            validate_key(1, 1, 1, 0x81, &[0x00; 8]),
            Err(KeyValidationError::InvalidParity)
        );
    }

    #[test]
    fn test_des_weak_semi_weak_and_guessable_keys_warn() {
        assert_eq!(
            validate_key(1, 1, 1, 0x81, &DES_WEAK_KEYS[0]),
            Ok(vec![KeyWarning::WeakDesKey])
        );
        assert_eq!(
            validate_key(1, 1, 1, 0x81, &DES_SEMI_WEAK_KEYS[3]),
            Ok(vec![KeyWarning::SemiWeakDesKey])
        );
        assert_eq!(
            validate_key(1, 1, 1, 0x9F, &DES_GUESSABLE_KEYS[0]),
            Ok(vec![KeyWarning::GuessableKey])
        );
    }

    #[test]
    fn test_aes_lengths() {
        assert!(validate_key(1, 1, 1, 0x84, &[0x5A; 16]).is_err());
        assert!(validate_key(1, 1, 1, 0x85, &[0x5A; 32]).is_err());
        assert_eq!(validate_key(1, 1, 1, 0x85, &[0x5A; 16]), Ok(vec![]));
    }

    #[test]
    fn test_aes256_guessable_keys_warn() {
        let counting: Vec<u8> = (0u8..32).collect();
        assert_eq!(
            validate_key(1, 1, 1, 0x84, &counting),
            Ok(vec![KeyWarning::GuessableKey])
        );
        assert_eq!(
            validate_key(1, 1, 1, 0x84, &[0xFF; 32]),
            Ok(vec![KeyWarning::GuessableKey])
        );
    }

    #[test]
    fn test_adp_rules() {
        assert!(validate_key(1, 1, 1, 0xAA, &[0x5A; 8]).is_err());
        assert_eq!(
            validate_key(1, 1, 1, 0xAA, &[0x00; 5]),
            Ok(vec![KeyWarning::GuessableKey])
        );
        assert_eq!(validate_key(1, 1, 1, 0xAA, &[0x12, 0x9C, 0x44, 0x0B, 0xE7]), Ok(vec![]));
    }

    #[test]
    fn test_unknown_algorithm_warns() {
        assert_eq!(
            validate_key(1, 1, 1, 0xC0, &[0x01]),
            Ok(vec![KeyWarning::UnknownAlgorithm(0xC0)])
        );
    }

    #[test]
    fn test_sln_advisories() {
        assert_eq!(
            validate_key(1, 0, 1, 0x85, &[0x5A; 16]),
            Ok(vec![KeyWarning::SlnZero])
        );
        assert_eq!(
            validate_key(1, 0x2001, 1, 0x85, &[0x5A; 16]),
            Ok(vec![KeyWarning::UnusualCryptoGroup { sln: 0x2001 }])
        );
        assert_eq!(validate_key(1, 0xF001, 1, 0x85, &[0x5A; 16]), Ok(vec![]));
    }

    #[test]
    fn test_fix_parity_is_idempotent() {
        let once = fix_parity(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        assert!(is_valid_parity(&once));
        assert_eq!(fix_parity(&once), once);
    }
}
