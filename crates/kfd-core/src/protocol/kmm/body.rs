//! The closed set of KMM bodies and their byte layouts.

use serde::{Deserialize, Serialize};

use super::ids::{MessageId, MFID_MOTOROLA};
use super::inventory::{InventoryCommand, InventoryResponse};
use super::session_control::{Mfid90SessionControl, SessionControl};
use super::status::OperationStatus;
use super::wire::{count_u8, read_rsi, read_u16, require_exact, require_len};
use super::KmmError;
use crate::domain::{KeyStatus, Rsi};

/// Message algorithm id for a clear (unencrypted) KMM body.
const CLEAR_MESSAGE_ALGORITHM: u8 = 0x80;

const MODIFY_KEY_HEADER_LEN: usize = 9;
const KEY_ITEM_HEADER_LEN: usize = 5;
const KEY_FORMAT_KEK: u8 = 0x80;
const KEY_FORMAT_ERASE: u8 = 0x20;

/// Every KMM body the engine can send or receive.
///
/// Matching is exhaustive everywhere a body is consumed, so adding a variant
/// forces every call site to decide how to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmmBody {
    SessionControl(SessionControl),
    Mfid90SessionControl(Mfid90SessionControl),
    InventoryCommand(InventoryCommand),
    InventoryResponse(InventoryResponse),
    ModifyKeyCommand(ModifyKeyCommand),
    RekeyAcknowledgment(RekeyAcknowledgment),
    NegativeAcknowledgment(NegativeAcknowledgment),
    ZeroizeCommand,
    ZeroizeResponse,
    ChangeoverCommand(KeysetChangeover),
    ChangeoverResponse(KeysetChangeover),
    ChangeRsiCommand(ChangeRsiCommand),
    ChangeRsiResponse(ChangeRsiResponse),
    LoadConfigCommand(LoadConfigCommand),
    LoadConfigResponse(LoadConfigResponse),
    CapabilitiesCommand,
    CapabilitiesResponse(CapabilitiesResponse),
}

impl KmmBody {
    pub fn message_id(&self) -> MessageId {
        match self {
            KmmBody::SessionControl(_) | KmmBody::Mfid90SessionControl(_) => MessageId::SessionControl,
            KmmBody::InventoryCommand(_) => MessageId::InventoryCommand,
            KmmBody::InventoryResponse(_) => MessageId::InventoryResponse,
            KmmBody::ModifyKeyCommand(_) => MessageId::ModifyKeyCommand,
            KmmBody::RekeyAcknowledgment(_) => MessageId::RekeyAcknowledgment,
            KmmBody::NegativeAcknowledgment(_) => MessageId::NegativeAcknowledgment,
            KmmBody::ZeroizeCommand => MessageId::ZeroizeCommand,
            KmmBody::ZeroizeResponse => MessageId::ZeroizeResponse,
            KmmBody::ChangeoverCommand(_) => MessageId::ChangeoverCommand,
            KmmBody::ChangeoverResponse(_) => MessageId::ChangeoverResponse,
            KmmBody::ChangeRsiCommand(_) => MessageId::ChangeRsiCommand,
            KmmBody::ChangeRsiResponse(_) => MessageId::ChangeRsiResponse,
            KmmBody::LoadConfigCommand(_) => MessageId::LoadConfigCommand,
            KmmBody::LoadConfigResponse(_) => MessageId::LoadConfigResponse,
            KmmBody::CapabilitiesCommand => MessageId::CapabilitiesCommand,
            KmmBody::CapabilitiesResponse(_) => MessageId::CapabilitiesResponse,
        }
    }

    /// `true` for bodies the key fill device originates.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            KmmBody::SessionControl(_)
                | KmmBody::Mfid90SessionControl(_)
                | KmmBody::InventoryCommand(_)
                | KmmBody::ModifyKeyCommand(_)
                | KmmBody::ZeroizeCommand
                | KmmBody::ChangeoverCommand(_)
                | KmmBody::ChangeRsiCommand(_)
                | KmmBody::LoadConfigCommand(_)
                | KmmBody::CapabilitiesCommand
        )
    }

    /// Short variant name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            KmmBody::SessionControl(_) => "SessionControl",
            KmmBody::Mfid90SessionControl(_) => "Mfid90SessionControl",
            KmmBody::InventoryCommand(_) => "InventoryCommand",
            KmmBody::InventoryResponse(_) => "InventoryResponse",
            KmmBody::ModifyKeyCommand(_) => "ModifyKeyCommand",
            KmmBody::RekeyAcknowledgment(_) => "RekeyAcknowledgment",
            KmmBody::NegativeAcknowledgment(_) => "NegativeAcknowledgment",
            KmmBody::ZeroizeCommand => "ZeroizeCommand",
            KmmBody::ZeroizeResponse => "ZeroizeResponse",
            KmmBody::ChangeoverCommand(_) => "ChangeoverCommand",
            KmmBody::ChangeoverResponse(_) => "ChangeoverResponse",
            KmmBody::ChangeRsiCommand(_) => "ChangeRsiCommand",
            KmmBody::ChangeRsiResponse(_) => "ChangeRsiResponse",
            KmmBody::LoadConfigCommand(_) => "LoadConfigCommand",
            KmmBody::LoadConfigResponse(_) => "LoadConfigResponse",
            KmmBody::CapabilitiesCommand => "CapabilitiesCommand",
            KmmBody::CapabilitiesResponse(_) => "CapabilitiesResponse",
        }
    }

    pub(super) fn encode(&self, buf: &mut Vec<u8>) -> Result<(), KmmError> {
        match self {
            KmmBody::SessionControl(m) => m.encode(buf),
            KmmBody::Mfid90SessionControl(m) => m.encode(buf),
            KmmBody::InventoryCommand(m) => m.encode(buf)?,
            KmmBody::InventoryResponse(m) => m.encode(buf)?,
            KmmBody::ModifyKeyCommand(m) => encode_modify_key(buf, m)?,
            KmmBody::RekeyAcknowledgment(m) => encode_rekey_ack(buf, m)?,
            KmmBody::NegativeAcknowledgment(m) => {
                buf.push(m.acked_message_id);
                buf.extend_from_slice(&m.message_number.to_be_bytes());
                buf.push(m.status);
            }
            KmmBody::ZeroizeCommand | KmmBody::ZeroizeResponse | KmmBody::CapabilitiesCommand => {}
            KmmBody::ChangeoverCommand(m) | KmmBody::ChangeoverResponse(m) => {
                encode_changeover(buf, m)?
            }
            KmmBody::ChangeRsiCommand(m) => {
                buf.push(m.change_sequence);
                buf.extend_from_slice(&m.rsi_old.to_be_bytes());
                buf.extend_from_slice(&m.rsi_new.to_be_bytes());
                buf.extend_from_slice(&m.message_number.to_be_bytes());
            }
            KmmBody::ChangeRsiResponse(m) => {
                buf.push(m.change_sequence);
                buf.extend_from_slice(&m.rsi_old.to_be_bytes());
                buf.extend_from_slice(&m.rsi_new.to_be_bytes());
                buf.push(m.status);
            }
            KmmBody::LoadConfigCommand(m) => {
                buf.extend_from_slice(&m.kmf_rsi.to_be_bytes());
                buf.extend_from_slice(&m.mnp.to_be_bytes());
            }
            KmmBody::LoadConfigResponse(m) => {
                buf.extend_from_slice(&m.kmf_rsi.to_be_bytes());
                buf.extend_from_slice(&m.mnp.to_be_bytes());
                buf.push(m.status);
            }
            KmmBody::CapabilitiesResponse(m) => encode_capabilities(buf, m)?,
        }
        Ok(())
    }

    /// Decodes a body; `mfid` picks the session-control dialect for id `0x31`.
    pub(super) fn decode(message_id: MessageId, mfid: u8, body: &[u8]) -> Result<Self, KmmError> {
        match message_id {
            MessageId::SessionControl if mfid == MFID_MOTOROLA => {
                Mfid90SessionControl::decode(body).map(KmmBody::Mfid90SessionControl)
            }
            MessageId::SessionControl => SessionControl::decode(body).map(KmmBody::SessionControl),
            MessageId::InventoryCommand => InventoryCommand::decode(body).map(KmmBody::InventoryCommand),
            MessageId::InventoryResponse => {
                InventoryResponse::decode(body).map(KmmBody::InventoryResponse)
            }
            MessageId::ModifyKeyCommand => decode_modify_key(body).map(KmmBody::ModifyKeyCommand),
            MessageId::RekeyAcknowledgment => decode_rekey_ack(body).map(KmmBody::RekeyAcknowledgment),
            MessageId::NegativeAcknowledgment => {
                require_exact(body, 4, "NegativeAcknowledgment")?;
                Ok(KmmBody::NegativeAcknowledgment(NegativeAcknowledgment {
                    acked_message_id: body[0],
                    message_number: read_u16(body, 1)?,
                    status: body[3],
                }))
            }
            MessageId::ZeroizeCommand => {
                require_exact(body, 0, "ZeroizeCommand")?;
                Ok(KmmBody::ZeroizeCommand)
            }
            MessageId::ZeroizeResponse => {
                require_exact(body, 0, "ZeroizeResponse")?;
                Ok(KmmBody::ZeroizeResponse)
            }
            MessageId::CapabilitiesCommand => {
                require_exact(body, 0, "CapabilitiesCommand")?;
                Ok(KmmBody::CapabilitiesCommand)
            }
            MessageId::ChangeoverCommand => {
                decode_changeover(body, "ChangeoverCommand").map(KmmBody::ChangeoverCommand)
            }
            MessageId::ChangeoverResponse => {
                decode_changeover(body, "ChangeoverResponse").map(KmmBody::ChangeoverResponse)
            }
            MessageId::ChangeRsiCommand => {
                require_exact(body, 9, "ChangeRsiCommand")?;
                Ok(KmmBody::ChangeRsiCommand(ChangeRsiCommand {
                    change_sequence: body[0],
                    rsi_old: read_rsi(body, 1)?,
                    rsi_new: read_rsi(body, 4)?,
                    message_number: read_u16(body, 7)?,
                }))
            }
            MessageId::ChangeRsiResponse => {
                require_exact(body, 8, "ChangeRsiResponse")?;
                Ok(KmmBody::ChangeRsiResponse(ChangeRsiResponse {
                    change_sequence: body[0],
                    rsi_old: read_rsi(body, 1)?,
                    rsi_new: read_rsi(body, 4)?,
                    status: body[7],
                }))
            }
            MessageId::LoadConfigCommand => {
                require_exact(body, 5, "LoadConfigCommand")?;
                Ok(KmmBody::LoadConfigCommand(LoadConfigCommand {
                    kmf_rsi: read_rsi(body, 0)?,
                    mnp: read_u16(body, 3)?,
                }))
            }
            MessageId::LoadConfigResponse => {
                require_exact(body, 6, "LoadConfigResponse")?;
                Ok(KmmBody::LoadConfigResponse(LoadConfigResponse {
                    kmf_rsi: read_rsi(body, 0)?,
                    mnp: read_u16(body, 3)?,
                    status: body[5],
                }))
            }
            MessageId::CapabilitiesResponse => {
                decode_capabilities(body).map(KmmBody::CapabilitiesResponse)
            }
        }
    }
}

// ── Body types ────────────────────────────────────────────────────────────────

/// One key inside a [`ModifyKeyCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyItem {
    pub sln: u16,
    pub key_id: u16,
    pub is_kek: bool,
    /// Erase the key in this slot instead of loading it.
    pub erase: bool,
    pub key: Vec<u8>,
}

/// Loads or erases keys of one algorithm in one keyset.
///
/// All keys must share a length; the length byte on the wire is taken from
/// the first key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyKeyCommand {
    /// Target keyset; `0xFF` addresses the active KEK keyset.
    pub keyset_id: u8,
    pub algorithm_id: u8,
    pub keys: Vec<KeyItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyAcknowledgment {
    pub acked_message_id: u8,
    pub statuses: Vec<KeyStatus>,
}

/// The radio refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeAcknowledgment {
    pub acked_message_id: u8,
    pub message_number: u16,
    pub status: u8,
}

impl NegativeAcknowledgment {
    pub fn operation_status(&self) -> OperationStatus {
        OperationStatus::from_code(self.status)
    }
}

/// A superseded/activated keyset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetPair {
    pub superseded: u8,
    pub activated: u8,
}

/// Body shared by the changeover command and response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetChangeover {
    pub pairs: Vec<KeysetPair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRsiCommand {
    pub change_sequence: u8,
    pub rsi_old: Rsi,
    pub rsi_new: Rsi,
    pub message_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRsiResponse {
    pub change_sequence: u8,
    pub rsi_old: Rsi,
    pub rsi_new: Rsi,
    pub status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfigCommand {
    pub kmf_rsi: Rsi,
    pub mnp: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfigResponse {
    pub kmf_rsi: Rsi,
    pub mnp: u16,
    pub status: u8,
}

/// Algorithms, services and message ids the radio supports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub algorithms: Vec<u8>,
    pub services: Vec<u8>,
    pub message_ids: Vec<u8>,
}

// ── Per-body encode/decode helpers ────────────────────────────────────────────

fn encode_modify_key(buf: &mut Vec<u8>, m: &ModifyKeyCommand) -> Result<(), KmmError> {
    let key_len = m.keys.first().map_or(0, |k| k.key.len());
    if let Some(other) = m.keys.iter().find(|k| k.key.len() != key_len) {
        return Err(KmmError::InconsistentKeyLength {
            expected: key_len,
            actual: other.key.len(),
        });
    }
    let key_len_byte = count_u8(key_len, "key length")?;
    let count = count_u8(m.keys.len(), "key count")?;

    // decrypt format, extended decrypt format, message algorithm, message key id
    buf.extend_from_slice(&[0x00, 0x00, CLEAR_MESSAGE_ALGORITHM, 0x00, 0x00]);
    buf.extend_from_slice(&[m.keyset_id, m.algorithm_id, key_len_byte, count]);
    for key in &m.keys {
        let mut format = 0u8;
        if key.is_kek {
            format |= KEY_FORMAT_KEK;
        }
        if key.erase {
            format |= KEY_FORMAT_ERASE;
        }
        buf.push(format);
        buf.extend_from_slice(&key.sln.to_be_bytes());
        buf.extend_from_slice(&key.key_id.to_be_bytes());
        buf.extend_from_slice(&key.key);
    }
    Ok(())
}

fn decode_modify_key(body: &[u8]) -> Result<ModifyKeyCommand, KmmError> {
    require_len(body, MODIFY_KEY_HEADER_LEN, "ModifyKeyCommand")?;
    if body[0] != 0 || body[1] != 0 || body[2] != CLEAR_MESSAGE_ALGORITHM {
        return Err(KmmError::UnsupportedEncryption);
    }
    let keyset_id = body[5];
    let algorithm_id = body[6];
    let key_len = usize::from(body[7]);
    let count = usize::from(body[8]);
    let item_len = KEY_ITEM_HEADER_LEN + key_len;
    require_exact(body, MODIFY_KEY_HEADER_LEN + count * item_len, "ModifyKeyCommand")?;

    let mut keys = Vec::with_capacity(count);
    for item in body[MODIFY_KEY_HEADER_LEN..].chunks_exact(item_len) {
        let format = item[0];
        if format & !(KEY_FORMAT_KEK | KEY_FORMAT_ERASE) != 0 {
            return Err(KmmError::FieldOutOfRange {
                field: "key format",
                value: format.into(),
            });
        }
        keys.push(KeyItem {
            sln: u16::from_be_bytes([item[1], item[2]]),
            key_id: u16::from_be_bytes([item[3], item[4]]),
            is_kek: format & KEY_FORMAT_KEK != 0,
            erase: format & KEY_FORMAT_ERASE != 0,
            key: item[KEY_ITEM_HEADER_LEN..].to_vec(),
        });
    }
    Ok(ModifyKeyCommand {
        keyset_id,
        algorithm_id,
        keys,
    })
}

fn encode_rekey_ack(buf: &mut Vec<u8>, m: &RekeyAcknowledgment) -> Result<(), KmmError> {
    buf.push(m.acked_message_id);
    buf.push(count_u8(m.statuses.len(), "key status count")?);
    for status in &m.statuses {
        buf.push(status.algorithm_id);
        buf.extend_from_slice(&status.key_id.to_be_bytes());
        buf.push(status.status);
    }
    Ok(())
}

fn decode_rekey_ack(body: &[u8]) -> Result<RekeyAcknowledgment, KmmError> {
    require_len(body, 2, "RekeyAcknowledgment")?;
    let count = usize::from(body[1]);
    require_exact(body, 2 + 4 * count, "RekeyAcknowledgment")?;
    let statuses = body[2..]
        .chunks_exact(4)
        .map(|r| KeyStatus {
            algorithm_id: r[0],
            key_id: u16::from_be_bytes([r[1], r[2]]),
            status: r[3],
        })
        .collect();
    Ok(RekeyAcknowledgment {
        acked_message_id: body[0],
        statuses,
    })
}

fn encode_changeover(buf: &mut Vec<u8>, m: &KeysetChangeover) -> Result<(), KmmError> {
    buf.push(count_u8(m.pairs.len(), "keyset pair count")?);
    for pair in &m.pairs {
        buf.extend_from_slice(&[pair.superseded, pair.activated]);
    }
    Ok(())
}

fn decode_changeover(body: &[u8], context: &'static str) -> Result<KeysetChangeover, KmmError> {
    require_len(body, 1, context)?;
    let count = usize::from(body[0]);
    require_exact(body, 1 + 2 * count, context)?;
    let pairs = body[1..]
        .chunks_exact(2)
        .map(|p| KeysetPair {
            superseded: p[0],
            activated: p[1],
        })
        .collect();
    Ok(KeysetChangeover { pairs })
}

fn encode_capabilities(buf: &mut Vec<u8>, m: &CapabilitiesResponse) -> Result<(), KmmError> {
    for (list, field) in [
        (&m.algorithms, "algorithm count"),
        (&m.services, "service count"),
        (&m.message_ids, "message id count"),
    ] {
        buf.push(count_u8(list.len(), field)?);
        buf.extend_from_slice(list);
    }
    Ok(())
}

fn decode_capabilities(body: &[u8]) -> Result<CapabilitiesResponse, KmmError> {
    let mut offset = 0;
    let mut lists: [Vec<u8>; 3] = Default::default();
    for list in lists.iter_mut() {
        require_len(body, offset + 1, "CapabilitiesResponse")?;
        let count = usize::from(body[offset]);
        offset += 1;
        require_len(body, offset + count, "CapabilitiesResponse")?;
        *list = body[offset..offset + count].to_vec();
        offset += count;
    }
    require_exact(body, offset, "CapabilitiesResponse")?;
    let [algorithms, services, message_ids] = lists;
    Ok(CapabilitiesResponse {
        algorithms,
        services,
        message_ids,
    })
}
