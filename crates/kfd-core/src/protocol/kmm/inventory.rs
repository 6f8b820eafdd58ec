//! Inventory command and response bodies.
//!
//! The first body byte selects the inventory subtype.  Every response subtype
//! has an exact expected length derived from its item count; any deviation
//! is a [`KmmError::LengthMismatch`].

use serde::{Deserialize, Serialize};

use super::ids::InventoryType;
use super::wire::{count_u16, count_u8, read_rsi, read_u16, read_u24, require_exact, require_len, write_u24};
use super::KmmError;
use crate::domain::{Rsi, RsiItem};

const KEY_INFO_LEN: usize = 6;
const RSI_ITEM_LEN: usize = 5;
const DATETIME_LEN: usize = 5;
const RESERVED_LEN: usize = 3;

const TAG_RESERVED_PRESENT: u8 = 0x80;
const TAG_DATETIME_PRESENT: u8 = 0x40;
const TAG_UNUSED_BITS: u8 = 0x30;
const TAG_NAME_LEN_MASK: u8 = 0x0F;

// ── Commands ──────────────────────────────────────────────────────────────────

/// An inventory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryCommand {
    ListActiveKsetIds,
    /// One page of active keys starting at `marker` (0 for the first page).
    ListActiveKeys { marker: u32, max_keys: u16 },
    ListRsiItems,
    ListMnp,
    ListKmfRsi,
    ListKeysetTaggingInfo,
}

impl InventoryCommand {
    pub fn inventory_type(&self) -> InventoryType {
        match self {
            InventoryCommand::ListActiveKsetIds => InventoryType::ListActiveKsetIds,
            InventoryCommand::ListActiveKeys { .. } => InventoryType::ListActiveKeys,
            InventoryCommand::ListRsiItems => InventoryType::ListRsiItems,
            InventoryCommand::ListMnp => InventoryType::ListMnp,
            InventoryCommand::ListKmfRsi => InventoryType::ListKmfRsi,
            InventoryCommand::ListKeysetTaggingInfo => InventoryType::ListKeysetTaggingInfo,
        }
    }

    pub(super) fn encode(&self, buf: &mut Vec<u8>) -> Result<(), KmmError> {
        buf.push(self.inventory_type() as u8);
        if let InventoryCommand::ListActiveKeys { marker, max_keys } = self {
            write_u24(buf, *marker, "inventory marker")?;
            buf.extend_from_slice(&max_keys.to_be_bytes());
        }
        Ok(())
    }

    pub(super) fn decode(body: &[u8]) -> Result<Self, KmmError> {
        let command = match decode_type(body)? {
            InventoryType::ListActiveKeys => {
                require_exact(body, 6, "InventoryCommandListActiveKeys")?;
                return Ok(InventoryCommand::ListActiveKeys {
                    marker: read_u24(body, 1)?,
                    max_keys: read_u16(body, 4)?,
                });
            }
            InventoryType::ListActiveKsetIds => InventoryCommand::ListActiveKsetIds,
            InventoryType::ListRsiItems => InventoryCommand::ListRsiItems,
            InventoryType::ListMnp => InventoryCommand::ListMnp,
            InventoryType::ListKmfRsi => InventoryCommand::ListKmfRsi,
            InventoryType::ListKeysetTaggingInfo => InventoryCommand::ListKeysetTaggingInfo,
        };
        require_exact(body, 1, "InventoryCommand")?;
        Ok(command)
    }
}

// ── Response records ──────────────────────────────────────────────────────────

/// One active key reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub keyset_id: u8,
    pub sln: u16,
    pub algorithm_id: u8,
    pub key_id: u16,
}

/// Keyset activation time, packed into five bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl KeysetDateTime {
    /// Packs `month:4 day:5 year-2000:7 hour:5 minute:6 second:6 reserved:7`.
    fn to_bytes(self) -> Result<[u8; DATETIME_LEN], KmmError> {
        check_field("year", self.year.into(), 2000, 2127)?;
        check_field("month", self.month.into(), 1, 12)?;
        check_field("day", self.day.into(), 1, 31)?;
        check_field("hour", self.hour.into(), 0, 23)?;
        check_field("minute", self.minute.into(), 0, 59)?;
        check_field("second", self.second.into(), 0, 59)?;

        let packed: u64 = (u64::from(self.month) << 36)
            | (u64::from(self.day) << 31)
            | (u64::from(self.year - 2000) << 24)
            | (u64::from(self.hour) << 19)
            | (u64::from(self.minute) << 13)
            | (u64::from(self.second) << 7);
        let bytes = packed.to_be_bytes();
        Ok([bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let packed = bytes
            .iter()
            .take(DATETIME_LEN)
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        Self {
            month: ((packed >> 36) & 0x0F) as u8,
            day: ((packed >> 31) & 0x1F) as u8,
            year: 2000 + ((packed >> 24) & 0x7F) as u16,
            hour: ((packed >> 19) & 0x1F) as u8,
            minute: ((packed >> 13) & 0x3F) as u8,
            second: ((packed >> 7) & 0x3F) as u8,
        }
    }
}

fn check_field(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), KmmError> {
    if value < min || value > max {
        return Err(KmmError::FieldOutOfRange { field, value });
    }
    Ok(())
}

/// Tagging information for one keyset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetInfo {
    pub keyset_id: u8,
    pub keyset_type: u8,
    pub reserved: Option<[u8; RESERVED_LEN]>,
    pub activation: Option<KeysetDateTime>,
    /// At most 15 bytes; trailing zero padding is stripped on decode.
    pub name: String,
}

impl KeysetInfo {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), KmmError> {
        let name = self.name.as_bytes();
        if name.len() > usize::from(TAG_NAME_LEN_MASK) {
            return Err(KmmError::FieldOutOfRange {
                field: "keyset name length",
                value: name.len() as u64,
            });
        }
        let mut format = name.len() as u8;
        if self.reserved.is_some() {
            format |= TAG_RESERVED_PRESENT;
        }
        if self.activation.is_some() {
            format |= TAG_DATETIME_PRESENT;
        }
        buf.extend_from_slice(&[format, self.keyset_id, self.keyset_type]);
        if let Some(reserved) = self.reserved {
            buf.extend_from_slice(&reserved);
        }
        if let Some(activation) = self.activation {
            buf.extend_from_slice(&activation.to_bytes()?);
        }
        buf.extend_from_slice(name);
        Ok(())
    }

    /// Decodes one record, returning it and the number of bytes consumed.
    fn decode(buf: &[u8]) -> Result<(Self, usize), KmmError> {
        require_len(buf, 3, "KeysetInfo")?;
        let format = buf[0];
        if format & TAG_UNUSED_BITS != 0 {
            return Err(KmmError::FieldOutOfRange {
                field: "keyset tag format",
                value: format.into(),
            });
        }
        let mut offset = 3;

        let reserved = if format & TAG_RESERVED_PRESENT != 0 {
            require_len(buf, offset + RESERVED_LEN, "KeysetInfo reserved")?;
            let field = [buf[offset], buf[offset + 1], buf[offset + 2]];
            offset += RESERVED_LEN;
            Some(field)
        } else {
            None
        };

        let activation = if format & TAG_DATETIME_PRESENT != 0 {
            require_len(buf, offset + DATETIME_LEN, "KeysetInfo datetime")?;
            let dt = KeysetDateTime::from_bytes(&buf[offset..offset + DATETIME_LEN]);
            offset += DATETIME_LEN;
            Some(dt)
        } else {
            None
        };

        let name_len = usize::from(format & TAG_NAME_LEN_MASK);
        require_len(buf, offset + name_len, "KeysetInfo name")?;
        let raw_name = &buf[offset..offset + name_len];
        let trimmed_len = raw_name.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let name = std::str::from_utf8(&raw_name[..trimmed_len])
            .map_err(|_| KmmError::InvalidText {
                context: "KeysetInfo name",
            })?
            .to_string();
        offset += name_len;

        Ok((
            Self {
                keyset_id: buf[1],
                keyset_type: buf[2],
                reserved,
                activation,
                name,
            },
            offset,
        ))
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// An inventory reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryResponse {
    ListActiveKsetIds(Vec<u8>),
    /// One page of keys; `marker == 0` means this is the last page.
    ListActiveKeys { marker: u32, keys: Vec<KeyInfo> },
    ListRsiItems(Vec<RsiItem>),
    ListMnp(u16),
    ListKmfRsi(Rsi),
    ListKeysetTaggingInfo(Vec<KeysetInfo>),
}

impl InventoryResponse {
    pub fn inventory_type(&self) -> InventoryType {
        match self {
            InventoryResponse::ListActiveKsetIds(_) => InventoryType::ListActiveKsetIds,
            InventoryResponse::ListActiveKeys { .. } => InventoryType::ListActiveKeys,
            InventoryResponse::ListRsiItems(_) => InventoryType::ListRsiItems,
            InventoryResponse::ListMnp(_) => InventoryType::ListMnp,
            InventoryResponse::ListKmfRsi(_) => InventoryType::ListKmfRsi,
            InventoryResponse::ListKeysetTaggingInfo(_) => InventoryType::ListKeysetTaggingInfo,
        }
    }

    pub(super) fn encode(&self, buf: &mut Vec<u8>) -> Result<(), KmmError> {
        buf.push(self.inventory_type() as u8);
        match self {
            InventoryResponse::ListActiveKsetIds(ids) => {
                buf.push(count_u8(ids.len(), "keyset id count")?);
                buf.extend_from_slice(ids);
            }
            InventoryResponse::ListActiveKeys { marker, keys } => {
                write_u24(buf, *marker, "inventory marker")?;
                buf.extend_from_slice(&count_u16(keys.len(), "key count")?.to_be_bytes());
                for key in keys {
                    buf.push(key.keyset_id);
                    buf.extend_from_slice(&key.sln.to_be_bytes());
                    buf.push(key.algorithm_id);
                    buf.extend_from_slice(&key.key_id.to_be_bytes());
                }
            }
            InventoryResponse::ListRsiItems(items) => {
                buf.extend_from_slice(&count_u16(items.len(), "RSI count")?.to_be_bytes());
                for item in items {
                    buf.extend_from_slice(&item.rsi.to_be_bytes());
                    buf.extend_from_slice(&item.message_number.to_be_bytes());
                }
            }
            InventoryResponse::ListMnp(mnp) => buf.extend_from_slice(&mnp.to_be_bytes()),
            InventoryResponse::ListKmfRsi(rsi) => buf.extend_from_slice(&rsi.to_be_bytes()),
            InventoryResponse::ListKeysetTaggingInfo(keysets) => {
                buf.push(count_u8(keysets.len(), "keyset count")?);
                for keyset in keysets {
                    keyset.encode(buf)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn decode(body: &[u8]) -> Result<Self, KmmError> {
        match decode_type(body)? {
            InventoryType::ListActiveKsetIds => {
                require_len(body, 2, "InventoryResponseListActiveKsetIds")?;
                let n = usize::from(body[1]);
                require_exact(body, 2 + n, "InventoryResponseListActiveKsetIds")?;
                Ok(InventoryResponse::ListActiveKsetIds(body[2..].to_vec()))
            }
            InventoryType::ListActiveKeys => {
                require_len(body, 6, "InventoryResponseListActiveKeys")?;
                let marker = read_u24(body, 1)?;
                let n = usize::from(read_u16(body, 4)?);
                require_exact(body, 6 + KEY_INFO_LEN * n, "InventoryResponseListActiveKeys")?;
                let keys = body[6..]
                    .chunks_exact(KEY_INFO_LEN)
                    .map(|r| KeyInfo {
                        keyset_id: r[0],
                        sln: u16::from_be_bytes([r[1], r[2]]),
                        algorithm_id: r[3],
                        key_id: u16::from_be_bytes([r[4], r[5]]),
                    })
                    .collect();
                Ok(InventoryResponse::ListActiveKeys { marker, keys })
            }
            InventoryType::ListRsiItems => {
                require_len(body, 3, "InventoryResponseListRsiItems")?;
                let n = usize::from(read_u16(body, 1)?);
                require_exact(body, 3 + RSI_ITEM_LEN * n, "InventoryResponseListRsiItems")?;
                let items = body[3..]
                    .chunks_exact(RSI_ITEM_LEN)
                    .map(|r| RsiItem {
                        rsi: Rsi::from_be_bytes([r[0], r[1], r[2]]),
                        message_number: u16::from_be_bytes([r[3], r[4]]),
                    })
                    .collect();
                Ok(InventoryResponse::ListRsiItems(items))
            }
            InventoryType::ListMnp => {
                require_exact(body, 3, "InventoryResponseListMnp")?;
                Ok(InventoryResponse::ListMnp(read_u16(body, 1)?))
            }
            InventoryType::ListKmfRsi => {
                require_exact(body, 4, "InventoryResponseListKmfRsi")?;
                Ok(InventoryResponse::ListKmfRsi(read_rsi(body, 1)?))
            }
            InventoryType::ListKeysetTaggingInfo => {
                require_len(body, 2, "InventoryResponseListKeysetTaggingInfo")?;
                let n = usize::from(body[1]);
                let mut offset = 2;
                let mut keysets = Vec::with_capacity(n);
                for _ in 0..n {
                    let (keyset, used) = KeysetInfo::decode(&body[offset..])?;
                    keysets.push(keyset);
                    offset += used;
                }
                require_exact(body, offset, "InventoryResponseListKeysetTaggingInfo")?;
                Ok(InventoryResponse::ListKeysetTaggingInfo(keysets))
            }
        }
    }
}

fn decode_type(body: &[u8]) -> Result<InventoryType, KmmError> {
    require_len(body, 1, "inventory type")?;
    InventoryType::try_from(body[0]).map_err(|_| KmmError::UnknownInventoryType(body[0]))
}
