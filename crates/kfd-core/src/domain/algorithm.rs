//! P25 algorithm identifiers.

/// Well-known algorithm identifiers carried in the KMM `algorithm_id` field.
///
/// The wire value is a plain `u8`; this enum only names the values the engine
/// treats specially.  Use [`AlgorithmId::from_u8`] for lookups and keep the raw
/// byte for anything unrecognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlgorithmId {
    /// Unencrypted; never loadable as a key.
    Clear = 0x80,
    /// DES-OFB.
    DesOfb = 0x81,
    /// Triple DES.
    TripleDes = 0x83,
    /// AES-256.
    Aes256 = 0x84,
    /// AES-128.
    Aes128 = 0x85,
    /// DES-XL.
    DesXl = 0x9F,
    /// ADP (RC4-based).
    Adp = 0xAA,
}

/// Highest algorithm id reserved for Type 1 algorithms.
pub const TYPE1_MAX: u8 = 0x41;

impl AlgorithmId {
    /// Looks up a known algorithm by its wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x80 => Some(AlgorithmId::Clear),
            0x81 => Some(AlgorithmId::DesOfb),
            0x83 => Some(AlgorithmId::TripleDes),
            0x84 => Some(AlgorithmId::Aes256),
            0x85 => Some(AlgorithmId::Aes128),
            0x9F => Some(AlgorithmId::DesXl),
            0xAA => Some(AlgorithmId::Adp),
            _ => None,
        }
    }

    /// Required key length in bytes, where the algorithm fixes one.
    pub fn key_length(self) -> Option<usize> {
        match self {
            AlgorithmId::Clear => None,
            AlgorithmId::DesOfb | AlgorithmId::DesXl => Some(8),
            AlgorithmId::TripleDes => Some(24),
            AlgorithmId::Aes256 => Some(32),
            AlgorithmId::Aes128 => Some(16),
            AlgorithmId::Adp => Some(5),
        }
    }
}

/// Returns a display name for an algorithm id, known or not.
pub fn algorithm_name(value: u8) -> String {
    match AlgorithmId::from_u8(value) {
        Some(AlgorithmId::Clear) => "CLEAR".to_string(),
        Some(AlgorithmId::DesOfb) => "DES-OFB".to_string(),
        Some(AlgorithmId::TripleDes) => "TDES".to_string(),
        Some(AlgorithmId::Aes256) => "AES-256".to_string(),
        Some(AlgorithmId::Aes128) => "AES-128".to_string(),
        Some(AlgorithmId::DesXl) => "DES-XL".to_string(),
        Some(AlgorithmId::Adp) => "ADP".to_string(),
        None if value <= TYPE1_MAX => format!("TYPE1 (0x{value:02X})"),
        None => format!("UNKNOWN (0x{value:02X})"),
    }
}
