//! Key load requests, per-key status and radio set identifiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a domain value is constructed with an out-of-range field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// A field lies outside its documented range.  Values are never clamped.
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    ArgumentOutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// A key carries no key material.
    #[error("key material is empty")]
    EmptyKey,
}

pub(crate) fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), DomainError> {
    if value < min || value > max {
        return Err(DomainError::ArgumentOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

// ── CmdKeyItem ────────────────────────────────────────────────────────────────

/// One key-load request.
///
/// Fields are private so the range invariants checked by [`CmdKeyItem::new`]
/// hold for the lifetime of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdKeyItem {
    use_active_keyset: bool,
    keyset_id: u8,
    sln: u16,
    is_kek: bool,
    key_id: u16,
    algorithm_id: u8,
    key: Vec<u8>,
}

impl CmdKeyItem {
    /// Builds a key-load request, rejecting any out-of-range field.
    ///
    /// Ranges: keyset id 1–255, SLN 0–65535, key id 0–65535, algorithm id
    /// 0–255.  Wide integer parameters let callers pass unchecked user input
    /// straight through.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ArgumentOutOfRange`] for the first field outside
    /// its range, or [`DomainError::EmptyKey`] when `key` is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kfd_core::domain::CmdKeyItem;
    ///
    /// let item = CmdKeyItem::new(true, 1, 100, false, 1, 0x84, vec![0u8; 32]).unwrap();
    /// assert_eq!(item.sln(), 100);
    /// assert!(CmdKeyItem::new(false, 0, 100, false, 1, 0x84, vec![0u8; 32]).is_err());
    /// ```
    pub fn new(
        use_active_keyset: bool,
        keyset_id: u32,
        sln: u32,
        is_kek: bool,
        key_id: u32,
        algorithm_id: u32,
        key: Vec<u8>,
    ) -> Result<Self, DomainError> {
        check_range("keyset_id", keyset_id.into(), 1, 255)?;
        check_range("sln", sln.into(), 0, 0xFFFF)?;
        check_range("key_id", key_id.into(), 0, 0xFFFF)?;
        check_range("algorithm_id", algorithm_id.into(), 0, 0xFF)?;
        if key.is_empty() {
            return Err(DomainError::EmptyKey);
        }
        Ok(Self {
            use_active_keyset,
            keyset_id: keyset_id as u8,
            sln: sln as u16,
            is_kek,
            key_id: key_id as u16,
            algorithm_id: algorithm_id as u8,
            key,
        })
    }

    /// Load into whatever keyset the radio reports as active.
    pub fn use_active_keyset(&self) -> bool {
        self.use_active_keyset
    }

    /// Explicit keyset id (ignored when [`Self::use_active_keyset`] is set).
    pub fn keyset_id(&self) -> u8 {
        self.keyset_id
    }

    /// Storage location number / common key reference.
    pub fn sln(&self) -> u16 {
        self.sln
    }

    /// `true` for a key encryption key.
    pub fn is_kek(&self) -> bool {
        self.is_kek
    }

    pub fn key_id(&self) -> u16 {
        self.key_id
    }

    pub fn algorithm_id(&self) -> u8 {
        self.algorithm_id
    }

    /// Raw key material.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

// ── KeyStatus ─────────────────────────────────────────────────────────────────

/// Per-key result reported by the radio in a rekey acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub algorithm_id: u8,
    pub key_id: u16,
    /// Zero means success; anything else is an operation status code.
    pub status: u8,
}

impl KeyStatus {
    /// `true` when the radio accepted the key.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

// ── RSI ───────────────────────────────────────────────────────────────────────

/// A 24-bit radio set identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Rsi(u32);

impl Rsi {
    /// Largest representable RSI.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Validates and wraps a raw RSI.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ArgumentOutOfRange`] for values above 24 bits.
    pub fn new(value: u32) -> Result<Self, DomainError> {
        check_range("rsi", value.into(), 0, Self::MAX.into())?;
        Ok(Self(value))
    }

    /// Builds an RSI from three big-endian bytes; always in range.
    pub fn from_be_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub fn to_be_bytes(self) -> [u8; 3] {
        let [_, a, b, c] = self.0.to_be_bytes();
        [a, b, c]
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Rsi {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Rsi::new(value)
    }
}

impl From<Rsi> for u32 {
    fn from(rsi: Rsi) -> Self {
        rsi.0
    }
}

impl std::fmt::Display for Rsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the radio's RSI inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsiItem {
    pub rsi: Rsi,
    pub message_number: u16,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
