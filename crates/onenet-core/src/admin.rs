//! Admin message payload formats.
//!
//! Admin messages travel as single-data payloads with message type
//! `Admin`: byte 3 of the raw payload is the admin type and the
//! remaining bytes are type-specific fields, big-endian throughout.
//! This module encodes and decodes only the admin portion (type byte
//! onward); the surrounding single payload carries the CRC and
//! message ID.

extern crate alloc;

use alloc::vec::Vec;

use onenet_crypto::KeyFragment;

use crate::error::PayloadError;
use crate::features::Features;
use crate::types::{Did, Priority, UnitId};

/// Admin sub-type, the first byte of the admin portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdminType {
    StatusQuery = 0x00,
    StatusResponse = 0x01,
    ChangeSettings = 0x02,
    ChangeSettingsResponse = 0x03,
    ChangeFragmentDelay = 0x04,
    ChangeFragmentDelayResponse = 0x05,
    ChangeKeepAlive = 0x06,
    ChangeKeepAliveResponse = 0x07,
    KeepAliveQuery = 0x08,
    NewKeyFragment = 0x09,
    KeyFragmentConfirm = 0x0A,
    AssignPeer = 0x0B,
    UnassignPeer = 0x0C,
    AddDevice = 0x0D,
    AddDeviceResponse = 0x0E,
    RemoveDevice = 0x0F,
    RemoveDeviceResponse = 0x10,
    RequestBlock = 0x11,
    RequestStream = 0x12,
    RequestRepeater = 0x13,
    TerminateBlockStream = 0x14,
    ChangeDataRateChannel = 0x15,
}

impl AdminType {
    pub fn from_raw(raw: u8) -> Result<Self, PayloadError> {
        use AdminType::*;
        Ok(match raw {
            0x00 => StatusQuery,
            0x01 => StatusResponse,
            0x02 => ChangeSettings,
            0x03 => ChangeSettingsResponse,
            0x04 => ChangeFragmentDelay,
            0x05 => ChangeFragmentDelayResponse,
            0x06 => ChangeKeepAlive,
            0x07 => ChangeKeepAliveResponse,
            0x08 => KeepAliveQuery,
            0x09 => NewKeyFragment,
            0x0A => KeyFragmentConfirm,
            0x0B => AssignPeer,
            0x0C => UnassignPeer,
            0x0D => AddDevice,
            0x0E => AddDeviceResponse,
            0x0F => RemoveDevice,
            0x10 => RemoveDeviceResponse,
            0x11 => RequestBlock,
            0x12 => RequestStream,
            0x13 => RequestRepeater,
            0x14 => TerminateBlockStream,
            0x15 => ChangeDataRateChannel,
            other => return Err(PayloadError::InvalidAdminType(other)),
        })
    }
}

/// Parameters of a requested block or stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStreamRequest {
    /// Total bytes to move. Zero for an open-ended stream.
    pub transfer_size: u32,
    /// Packets per chunk (1..=40).
    pub chunk_size: u8,
    /// Delay between data packets in ms.
    pub frag_delay_ms: u16,
    /// Pause between chunks in ms.
    pub chunk_pause_ms: u16,
    pub channel: u8,
    pub data_rate: u8,
    /// Response deadline per chunk in ms.
    pub timeout_ms: u16,
    /// Final destination of the transfer.
    pub dst: Did,
    pub priority: Priority,
}

impl BlockStreamRequest {
    const LEN: usize = 16;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.transfer_size.to_be_bytes());
        out.push(self.chunk_size);
        out.extend_from_slice(&self.frag_delay_ms.to_be_bytes());
        out.extend_from_slice(&self.chunk_pause_ms.to_be_bytes());
        out.push(self.channel);
        out.push(self.data_rate);
        out.extend_from_slice(&self.timeout_ms.to_be_bytes());
        out.extend_from_slice(&self.dst.raw().to_be_bytes());
        out.push(self.priority.raw());
    }

    fn read(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < Self::LEN {
            return Err(PayloadError::TooShort {
                min: Self::LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            transfer_size: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            chunk_size: data[4],
            frag_delay_ms: u16::from_be_bytes([data[5], data[6]]),
            chunk_pause_ms: u16::from_be_bytes([data[7], data[8]]),
            channel: data[9],
            data_rate: data[10],
            timeout_ms: u16::from_be_bytes([data[11], data[12]]),
            dst: Did::new(u16::from_be_bytes([data[13], data[14]]))
                .map_err(PayloadError::InvalidField)?,
            priority: Priority::from_raw(data[15]).map_err(PayloadError::InvalidField)?,
        })
    }
}

/// A decoded admin message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum AdminMessage {
    StatusQuery,
    StatusResponse { features: Features },
    ChangeSettings { flags: u8 },
    ChangeSettingsResponse { flags: u8 },
    ChangeFragmentDelay { low_ms: u16, high_ms: u16 },
    ChangeFragmentDelayResponse { low_ms: u16, high_ms: u16 },
    ChangeKeepAlive { interval_ms: u32 },
    ChangeKeepAliveResponse { interval_ms: u32 },
    KeepAliveQuery,
    NewKeyFragment { fragment: KeyFragment },
    KeyFragmentConfirm { fragment: KeyFragment },
    AssignPeer { peer: Did, src_unit: UnitId, peer_unit: UnitId },
    UnassignPeer { peer: Did, src_unit: UnitId, peer_unit: UnitId },
    AddDevice { did: Did, features: Features },
    AddDeviceResponse { did: Did },
    RemoveDevice { did: Did },
    RemoveDeviceResponse { did: Did },
    RequestBlock(BlockStreamRequest),
    RequestStream(BlockStreamRequest),
    RequestRepeater { src: Did, dst: Did, data_rate: u8, channel: u8, duration_ms: u16 },
    TerminateBlockStream { status: u8 },
    ChangeDataRateChannel { data_rate: u8, channel: u8, pause_ms: u16, dwell_ms: u16 },
}

fn read_did(data: &[u8]) -> Result<Did, PayloadError> {
    if data.len() < 2 {
        return Err(PayloadError::TooShort {
            min: 2,
            actual: data.len(),
        });
    }
    Did::new(u16::from_be_bytes([data[0], data[1]])).map_err(PayloadError::InvalidField)
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, PayloadError> {
    if data.len() < at + 2 {
        return Err(PayloadError::TooShort {
            min: at + 2,
            actual: data.len(),
        });
    }
    Ok(u16::from_be_bytes([data[at], data[at + 1]]))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, PayloadError> {
    if data.len() < at + 4 {
        return Err(PayloadError::TooShort {
            min: at + 4,
            actual: data.len(),
        });
    }
    Ok(u32::from_be_bytes([
        data[at],
        data[at + 1],
        data[at + 2],
        data[at + 3],
    ]))
}

fn read_fragment(data: &[u8]) -> Result<KeyFragment, PayloadError> {
    if data.len() < 4 {
        return Err(PayloadError::TooShort {
            min: 4,
            actual: data.len(),
        });
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[..4]);
    Ok(KeyFragment::new(bytes))
}

fn read_features(data: &[u8], at: usize) -> Result<Features, PayloadError> {
    if data.len() < at + 4 {
        return Err(PayloadError::TooShort {
            min: at + 4,
            actual: data.len(),
        });
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    Ok(Features::new(bytes))
}

fn read_unit(data: &[u8], at: usize) -> Result<UnitId, PayloadError> {
    if data.len() <= at {
        return Err(PayloadError::TooShort {
            min: at + 1,
            actual: data.len(),
        });
    }
    UnitId::new(data[at]).map_err(PayloadError::InvalidField)
}

impl AdminMessage {
    pub fn admin_type(&self) -> AdminType {
        use AdminMessage::*;
        match self {
            StatusQuery => AdminType::StatusQuery,
            StatusResponse { .. } => AdminType::StatusResponse,
            ChangeSettings { .. } => AdminType::ChangeSettings,
            ChangeSettingsResponse { .. } => AdminType::ChangeSettingsResponse,
            ChangeFragmentDelay { .. } => AdminType::ChangeFragmentDelay,
            ChangeFragmentDelayResponse { .. } => AdminType::ChangeFragmentDelayResponse,
            ChangeKeepAlive { .. } => AdminType::ChangeKeepAlive,
            ChangeKeepAliveResponse { .. } => AdminType::ChangeKeepAliveResponse,
            KeepAliveQuery => AdminType::KeepAliveQuery,
            NewKeyFragment { .. } => AdminType::NewKeyFragment,
            KeyFragmentConfirm { .. } => AdminType::KeyFragmentConfirm,
            AssignPeer { .. } => AdminType::AssignPeer,
            UnassignPeer { .. } => AdminType::UnassignPeer,
            AddDevice { .. } => AdminType::AddDevice,
            AddDeviceResponse { .. } => AdminType::AddDeviceResponse,
            RemoveDevice { .. } => AdminType::RemoveDevice,
            RemoveDeviceResponse { .. } => AdminType::RemoveDeviceResponse,
            RequestBlock(_) => AdminType::RequestBlock,
            RequestStream(_) => AdminType::RequestStream,
            RequestRepeater { .. } => AdminType::RequestRepeater,
            TerminateBlockStream { .. } => AdminType::TerminateBlockStream,
            ChangeDataRateChannel { .. } => AdminType::ChangeDataRateChannel,
        }
    }

    /// Encode as the admin portion of a single payload: type byte plus
    /// fields.
    pub fn encode(&self) -> Vec<u8> {
        use AdminMessage::*;
        let mut out = Vec::with_capacity(8);
        out.push(self.admin_type() as u8);
        match self {
            StatusQuery | KeepAliveQuery => {}
            StatusResponse { features } => out.extend_from_slice(features.as_bytes()),
            ChangeSettings { flags } | ChangeSettingsResponse { flags } => out.push(*flags),
            ChangeFragmentDelay { low_ms, high_ms }
            | ChangeFragmentDelayResponse { low_ms, high_ms } => {
                out.extend_from_slice(&low_ms.to_be_bytes());
                out.extend_from_slice(&high_ms.to_be_bytes());
            }
            ChangeKeepAlive { interval_ms } | ChangeKeepAliveResponse { interval_ms } => {
                out.extend_from_slice(&interval_ms.to_be_bytes());
            }
            NewKeyFragment { fragment } | KeyFragmentConfirm { fragment } => {
                out.extend_from_slice(fragment.as_bytes());
            }
            AssignPeer {
                peer,
                src_unit,
                peer_unit,
            }
            | UnassignPeer {
                peer,
                src_unit,
                peer_unit,
            } => {
                out.extend_from_slice(&peer.raw().to_be_bytes());
                out.push(src_unit.raw());
                out.push(peer_unit.raw());
            }
            AddDevice { did, features } => {
                out.extend_from_slice(&did.raw().to_be_bytes());
                out.extend_from_slice(features.as_bytes());
            }
            AddDeviceResponse { did } | RemoveDevice { did } | RemoveDeviceResponse { did } => {
                out.extend_from_slice(&did.raw().to_be_bytes());
            }
            RequestBlock(req) | RequestStream(req) => req.write(&mut out),
            RequestRepeater {
                src,
                dst,
                data_rate,
                channel,
                duration_ms,
            } => {
                out.extend_from_slice(&src.raw().to_be_bytes());
                out.extend_from_slice(&dst.raw().to_be_bytes());
                out.push(*data_rate);
                out.push(*channel);
                out.extend_from_slice(&duration_ms.to_be_bytes());
            }
            TerminateBlockStream { status } => out.push(*status),
            ChangeDataRateChannel {
                data_rate,
                channel,
                pause_ms,
                dwell_ms,
            } => {
                out.push(*data_rate);
                out.push(*channel);
                out.extend_from_slice(&pause_ms.to_be_bytes());
                out.extend_from_slice(&dwell_ms.to_be_bytes());
            }
        }
        out
    }

    /// Decode the admin portion of a single payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.is_empty() {
            return Err(PayloadError::TooShort { min: 1, actual: 0 });
        }
        let admin_type = AdminType::from_raw(bytes[0])?;
        let data = &bytes[1..];

        use AdminType as T;
        Ok(match admin_type {
            T::StatusQuery => AdminMessage::StatusQuery,
            T::KeepAliveQuery => AdminMessage::KeepAliveQuery,
            T::StatusResponse => AdminMessage::StatusResponse {
                features: read_features(data, 0)?,
            },
            T::ChangeSettings => AdminMessage::ChangeSettings {
                flags: *data.first().ok_or(PayloadError::TooShort { min: 1, actual: 0 })?,
            },
            T::ChangeSettingsResponse => AdminMessage::ChangeSettingsResponse {
                flags: *data.first().ok_or(PayloadError::TooShort { min: 1, actual: 0 })?,
            },
            T::ChangeFragmentDelay => AdminMessage::ChangeFragmentDelay {
                low_ms: read_u16(data, 0)?,
                high_ms: read_u16(data, 2)?,
            },
            T::ChangeFragmentDelayResponse => AdminMessage::ChangeFragmentDelayResponse {
                low_ms: read_u16(data, 0)?,
                high_ms: read_u16(data, 2)?,
            },
            T::ChangeKeepAlive => AdminMessage::ChangeKeepAlive {
                interval_ms: read_u32(data, 0)?,
            },
            T::ChangeKeepAliveResponse => AdminMessage::ChangeKeepAliveResponse {
                interval_ms: read_u32(data, 0)?,
            },
            T::NewKeyFragment => AdminMessage::NewKeyFragment {
                fragment: read_fragment(data)?,
            },
            T::KeyFragmentConfirm => AdminMessage::KeyFragmentConfirm {
                fragment: read_fragment(data)?,
            },
            T::AssignPeer => AdminMessage::AssignPeer {
                peer: read_did(data)?,
                src_unit: read_unit(data, 2)?,
                peer_unit: read_unit(data, 3)?,
            },
            T::UnassignPeer => AdminMessage::UnassignPeer {
                peer: read_did(data)?,
                src_unit: read_unit(data, 2)?,
                peer_unit: read_unit(data, 3)?,
            },
            T::AddDevice => AdminMessage::AddDevice {
                did: read_did(data)?,
                features: read_features(data, 2)?,
            },
            T::AddDeviceResponse => AdminMessage::AddDeviceResponse { did: read_did(data)? },
            T::RemoveDevice => AdminMessage::RemoveDevice { did: read_did(data)? },
            T::RemoveDeviceResponse => AdminMessage::RemoveDeviceResponse { did: read_did(data)? },
            T::RequestBlock => AdminMessage::RequestBlock(BlockStreamRequest::read(data)?),
            T::RequestStream => AdminMessage::RequestStream(BlockStreamRequest::read(data)?),
            T::RequestRepeater => AdminMessage::RequestRepeater {
                src: read_did(data)?,
                dst: Did::new(read_u16(data, 2)?).map_err(PayloadError::InvalidField)?,
                data_rate: *data.get(4).ok_or(PayloadError::TooShort { min: 5, actual: data.len() })?,
                channel: *data.get(5).ok_or(PayloadError::TooShort { min: 6, actual: data.len() })?,
                duration_ms: read_u16(data, 6)?,
            },
            T::TerminateBlockStream => AdminMessage::TerminateBlockStream {
                status: *data.first().ok_or(PayloadError::TooShort { min: 1, actual: 0 })?,
            },
            T::ChangeDataRateChannel => AdminMessage::ChangeDataRateChannel {
                data_rate: *data.first().ok_or(PayloadError::TooShort { min: 1, actual: 0 })?,
                channel: *data.get(1).ok_or(PayloadError::TooShort { min: 2, actual: data.len() })?,
                pause_ms: read_u16(data, 2)?,
                dwell_ms: read_u16(data, 4)?,
            },
        })
    }
}
