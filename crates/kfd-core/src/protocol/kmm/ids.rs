//! Numeric identifiers carried in the KMM header and bodies.

use serde::{Deserialize, Serialize};

/// Manufacturer id for standard (non vendor-specific) KMMs.
pub const MFID_STANDARD: u8 = 0x00;

/// Manufacturer id selecting the Motorola session-control dialect.
pub const MFID_MOTOROLA: u8 = 0x90;

// ── Message ids ───────────────────────────────────────────────────────────────

/// All KMM message ids understood by the engine.
///
/// `0x31` is shared by both session-control dialects; the preamble MFID picks
/// which body decoder is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageId {
    ChangeRsiCommand = 0x03,
    ChangeRsiResponse = 0x04,
    ChangeoverCommand = 0x05,
    ChangeoverResponse = 0x06,
    InventoryCommand = 0x0D,
    InventoryResponse = 0x0E,
    ModifyKeyCommand = 0x13,
    NegativeAcknowledgment = 0x16,
    RekeyAcknowledgment = 0x1D,
    CapabilitiesCommand = 0x1F,
    CapabilitiesResponse = 0x20,
    ZeroizeCommand = 0x21,
    ZeroizeResponse = 0x22,
    LoadConfigCommand = 0x25,
    LoadConfigResponse = 0x26,
    SessionControl = 0x31,
}

impl TryFrom<u8> for MessageId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x03 => Ok(MessageId::ChangeRsiCommand),
            0x04 => Ok(MessageId::ChangeRsiResponse),
            0x05 => Ok(MessageId::ChangeoverCommand),
            0x06 => Ok(MessageId::ChangeoverResponse),
            0x0D => Ok(MessageId::InventoryCommand),
            0x0E => Ok(MessageId::InventoryResponse),
            0x13 => Ok(MessageId::ModifyKeyCommand),
            0x16 => Ok(MessageId::NegativeAcknowledgment),
            0x1D => Ok(MessageId::RekeyAcknowledgment),
            0x1F => Ok(MessageId::CapabilitiesCommand),
            0x20 => Ok(MessageId::CapabilitiesResponse),
            0x21 => Ok(MessageId::ZeroizeCommand),
            0x22 => Ok(MessageId::ZeroizeResponse),
            0x25 => Ok(MessageId::LoadConfigCommand),
            0x26 => Ok(MessageId::LoadConfigResponse),
            0x31 => Ok(MessageId::SessionControl),
            _ => Err(()),
        }
    }
}

// ── Response kind ─────────────────────────────────────────────────────────────

/// Response kind requested in bits 6–7 of the format byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseKind {
    None = 0,
    Delayed = 1,
    Immediate = 2,
}

impl TryFrom<u8> for ResponseKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(ResponseKind::None),
            1 => Ok(ResponseKind::Delayed),
            2 => Ok(ResponseKind::Immediate),
            _ => Err(()),
        }
    }
}

// ── Inventory types ───────────────────────────────────────────────────────────

/// Inventory subtype carried in the first body byte of inventory KMMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InventoryType {
    ListActiveKsetIds = 0x02,
    ListKeysetTaggingInfo = 0xF1,
    ListKmfRsi = 0xF7,
    ListMnp = 0xF8,
    ListRsiItems = 0xF9,
    ListActiveKeys = 0xFD,
}

impl TryFrom<u8> for InventoryType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x02 => Ok(InventoryType::ListActiveKsetIds),
            0xF1 => Ok(InventoryType::ListKeysetTaggingInfo),
            0xF7 => Ok(InventoryType::ListKmfRsi),
            0xF8 => Ok(InventoryType::ListMnp),
            0xF9 => Ok(InventoryType::ListRsiItems),
            0xFD => Ok(InventoryType::ListActiveKeys),
            _ => Err(()),
        }
    }
}
