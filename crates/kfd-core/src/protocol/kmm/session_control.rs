//! Session-control bodies (message id `0x31`) for both dialects.
//!
//! Body layout: `[version, opcode, source_device]`.  The standard dialect uses
//! version `0x00`; the Motorola (MFID `0x90`) dialect uses version `0x01` and a
//! different opcode set.

use super::wire::require_exact;
use super::KmmError;

const STANDARD_VERSION: u8 = 0x00;
const MFID90_VERSION: u8 = 0x01;
const BODY_LEN: usize = 3;

/// Which end of the link sent a session-control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SourceDevice {
    /// Key fill device.
    Kfd = 0x01,
    /// Mobile radio.
    Mr = 0x02,
}

impl TryFrom<u8> for SourceDevice {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(SourceDevice::Kfd),
            0x02 => Ok(SourceDevice::Mr),
            _ => Err(()),
        }
    }
}

// ── Standard dialect ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionOpcode {
    ReadyRequest = 0x01,
    ReadyGeneralMode = 0x02,
    TransferDone = 0x03,
    EndSession = 0x04,
    EndSessionAck = 0x05,
    Disconnect = 0x06,
    DisconnectAck = 0x07,
    BeginSession = 0x08,
    BeginSessionAck = 0x09,
}

impl TryFrom<u8> for SessionOpcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(SessionOpcode::ReadyRequest),
            0x02 => Ok(SessionOpcode::ReadyGeneralMode),
            0x03 => Ok(SessionOpcode::TransferDone),
            0x04 => Ok(SessionOpcode::EndSession),
            0x05 => Ok(SessionOpcode::EndSessionAck),
            0x06 => Ok(SessionOpcode::Disconnect),
            0x07 => Ok(SessionOpcode::DisconnectAck),
            0x08 => Ok(SessionOpcode::BeginSession),
            0x09 => Ok(SessionOpcode::BeginSessionAck),
            _ => Err(()),
        }
    }
}

/// Standard session-control body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionControl {
    pub opcode: SessionOpcode,
    pub source: SourceDevice,
}

impl SessionControl {
    /// A message sent by the key fill device.
    pub fn from_kfd(opcode: SessionOpcode) -> Self {
        Self {
            opcode,
            source: SourceDevice::Kfd,
        }
    }

    pub(super) fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[STANDARD_VERSION, self.opcode as u8, self.source as u8]);
    }

    pub(super) fn decode(body: &[u8]) -> Result<Self, KmmError> {
        let (opcode, source) = decode_common(body, STANDARD_VERSION, "SessionControl")?;
        let opcode = SessionOpcode::try_from(opcode).map_err(|_| KmmError::UnknownOpcode {
            context: "SessionControl",
            value: opcode,
        })?;
        Ok(Self { opcode, source })
    }
}

// ── Motorola dialect ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mfid90Opcode {
    Connect = 0x01,
    ConnectAck = 0x02,
    TransferDone = 0x03,
    EndSession = 0x04,
    EndSessionAck = 0x05,
    Disconnect = 0x06,
    DisconnectAck = 0x07,
    BeginSession = 0x08,
    BeginSessionAck = 0x09,
}

impl TryFrom<u8> for Mfid90Opcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Mfid90Opcode::Connect),
            0x02 => Ok(Mfid90Opcode::ConnectAck),
            0x03 => Ok(Mfid90Opcode::TransferDone),
            0x04 => Ok(Mfid90Opcode::EndSession),
            0x05 => Ok(Mfid90Opcode::EndSessionAck),
            0x06 => Ok(Mfid90Opcode::Disconnect),
            0x07 => Ok(Mfid90Opcode::DisconnectAck),
            0x08 => Ok(Mfid90Opcode::BeginSession),
            0x09 => Ok(Mfid90Opcode::BeginSessionAck),
            _ => Err(()),
        }
    }
}

/// Motorola (MFID `0x90`) session-control body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mfid90SessionControl {
    pub opcode: Mfid90Opcode,
    pub source: SourceDevice,
}

impl Mfid90SessionControl {
    pub fn from_kfd(opcode: Mfid90Opcode) -> Self {
        Self {
            opcode,
            source: SourceDevice::Kfd,
        }
    }

    pub(super) fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[MFID90_VERSION, self.opcode as u8, self.source as u8]);
    }

    pub(super) fn decode(body: &[u8]) -> Result<Self, KmmError> {
        let (opcode, source) = decode_common(body, MFID90_VERSION, "Mfid90SessionControl")?;
        let opcode = Mfid90Opcode::try_from(opcode).map_err(|_| KmmError::UnknownOpcode {
            context: "Mfid90SessionControl",
            value: opcode,
        })?;
        Ok(Self { opcode, source })
    }
}

fn decode_common(
    body: &[u8],
    version: u8,
    context: &'static str,
) -> Result<(u8, SourceDevice), KmmError> {
    require_exact(body, BODY_LEN, context)?;
    if body[0] != version {
        return Err(KmmError::UnsupportedVersion {
            context,
            value: body[0],
        });
    }
    let source = SourceDevice::try_from(body[2]).map_err(|_| KmmError::UnknownOpcode {
        context: "source device",
        value: body[2],
    })?;
    Ok((body[1], source))
}
