//! Raw payload layouts.
//!
//! Every raw payload opens the same way: byte 0 is the payload CRC
//! (computed over everything after it), byte 1 holds message-ID bits
//! 11..4, and byte 2 packs message-ID bits 3..0 into its high nibble
//! with a 4-bit type code in the low nibble. For data packets the type
//! code is a [`MessageType`]; for ACK/NACK packets the same nibble
//! carries the response handle instead.
//!
//! Block and stream data packets reserve bytes 3..7 for their position
//! header and carry 25 data bytes per packet.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use onenet_crypto::XteaKey;

use crate::crc::{crc8, PAYLOAD_CRC_INIT};
use crate::error::{InvalidValue, PayloadError};
use crate::features::Features;
use crate::types::{Did, MessageId};

/// Offset of the first data byte in a single payload.
pub const DATA_IDX: usize = 3;

/// Offset of block/stream data within the payload.
pub const BS_DATA_IDX: usize = 7;

/// Data bytes carried by one block or stream data packet.
pub const BS_DATA_LEN: usize = 25;

/// Highest chunk index within a chunk.
pub const MAX_CHUNK_IDX: u8 = 39;

/// The 4-bit type code of a data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    App = 0x0,
    Admin = 0x1,
    AppWithSrcUnit = 0x2,
    Route = 0x3,
}

impl MessageType {
    pub fn from_nibble(nibble: u8) -> Result<Self, PayloadError> {
        match nibble {
            0x0 => Ok(MessageType::App),
            0x1 => Ok(MessageType::Admin),
            0x2 => Ok(MessageType::AppWithSrcUnit),
            0x3 => Ok(MessageType::Route),
            other => Err(PayloadError::InvalidMessageType(other)),
        }
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }
}

/// Write the message-ID/nibble header into `raw[1..3]`.
pub(crate) fn write_header(raw: &mut [u8], msg_id: MessageId, nibble: u8) {
    raw[1] = (msg_id.raw() >> 4) as u8;
    raw[2] = (((msg_id.raw() & 0xF) as u8) << 4) | (nibble & 0xF);
}

/// Compute and store the payload CRC over `raw[1..]`.
pub(crate) fn seal(raw: &mut [u8]) {
    raw[0] = crc8(&raw[1..], PAYLOAD_CRC_INIT);
}

/// Verify the payload CRC and return the message ID and type nibble.
///
/// Nothing after byte 0 may be trusted before this passes; a CRC
/// failure on one key is the cue to retry the other key.
pub fn check(raw: &[u8]) -> Result<(MessageId, u8), PayloadError> {
    if raw.len() < DATA_IDX {
        return Err(PayloadError::TooShort {
            min: DATA_IDX,
            actual: raw.len(),
        });
    }
    let computed = crc8(&raw[1..], PAYLOAD_CRC_INIT);
    if computed != raw[0] {
        return Err(PayloadError::BadCrc {
            expected: computed,
            actual: raw[0],
        });
    }
    let msg_id = (u16::from(raw[1]) << 4) | u16::from(raw[2] >> 4);
    Ok((MessageId::new_unchecked(msg_id), raw[2] & 0xF))
}

/// A decoded single-data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct SinglePayload {
    pub msg_id: MessageId,
    pub msg_type: MessageType,
    /// Application or admin bytes from offset 3, zero-padded to the
    /// block boundary.
    pub data: Vec<u8>,
}

impl SinglePayload {
    /// Encode into `blocks * 8` raw bytes with CRC set.
    pub fn encode(&self, blocks: u8) -> Result<Vec<u8>, PayloadError> {
        let len = usize::from(blocks) * 8;
        let max = len - DATA_IDX;
        if self.data.len() > max {
            return Err(PayloadError::DataTooLong {
                max,
                actual: self.data.len(),
            });
        }
        let mut raw = vec![0u8; len];
        write_header(&mut raw, self.msg_id, self.msg_type.nibble());
        raw[DATA_IDX..DATA_IDX + self.data.len()].copy_from_slice(&self.data);
        seal(&mut raw);
        Ok(raw)
    }

    /// Parse from CRC-checked raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        let (msg_id, nibble) = check(raw)?;
        Ok(Self {
            msg_id,
            msg_type: MessageType::from_nibble(nibble)?,
            data: raw[DATA_IDX..].to_vec(),
        })
    }
}

/// A decoded block-data payload: one 25-byte slice of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct BlockPayload {
    pub msg_id: MessageId,
    /// Position of this packet within the current chunk (0..=39).
    pub chunk_idx: u8,
    /// Absolute byte position of `data[0]` within the transfer.
    pub byte_idx: u32,
    pub data: Vec<u8>,
}

impl BlockPayload {
    /// Encode into a 32-byte raw payload with CRC set.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        if self.chunk_idx > MAX_CHUNK_IDX {
            return Err(PayloadError::InvalidField(InvalidValue {
                field: "chunk_idx",
                max: MAX_CHUNK_IDX as u64,
                actual: self.chunk_idx as u64,
            }));
        }
        if self.byte_idx > 0xFF_FFFF {
            return Err(PayloadError::InvalidField(InvalidValue {
                field: "byte_idx",
                max: 0xFF_FFFF,
                actual: self.byte_idx as u64,
            }));
        }
        if self.data.len() > BS_DATA_LEN {
            return Err(PayloadError::DataTooLong {
                max: BS_DATA_LEN,
                actual: self.data.len(),
            });
        }
        let mut raw = vec![0u8; 32];
        write_header(&mut raw, self.msg_id, MessageType::App.nibble());
        raw[3] = self.chunk_idx;
        raw[4..7].copy_from_slice(&self.byte_idx.to_be_bytes()[1..]);
        raw[BS_DATA_IDX..BS_DATA_IDX + self.data.len()].copy_from_slice(&self.data);
        seal(&mut raw);
        Ok(raw)
    }

    /// Parse from CRC-checked 32-byte raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        if raw.len() < 32 {
            return Err(PayloadError::TooShort {
                min: 32,
                actual: raw.len(),
            });
        }
        let (msg_id, _) = check(raw)?;
        let byte_idx = (u32::from(raw[4]) << 16) | (u32::from(raw[5]) << 8) | u32::from(raw[6]);
        Ok(Self {
            msg_id,
            chunk_idx: raw[3],
            byte_idx,
            data: raw[BS_DATA_IDX..32].to_vec(),
        })
    }
}

/// A decoded stream-data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct StreamPayload {
    pub msg_id: MessageId,
    /// Sender wants an ACK for this packet.
    pub response_needed: bool,
    /// Milliseconds elapsed since the stream started (24-bit).
    pub elapsed_ms: u32,
    pub data: Vec<u8>,
}

impl StreamPayload {
    /// Encode into a 32-byte raw payload with CRC set.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        if self.elapsed_ms > 0xFF_FFFF {
            return Err(PayloadError::InvalidField(InvalidValue {
                field: "elapsed_ms",
                max: 0xFF_FFFF,
                actual: self.elapsed_ms as u64,
            }));
        }
        if self.data.len() > BS_DATA_LEN {
            return Err(PayloadError::DataTooLong {
                max: BS_DATA_LEN,
                actual: self.data.len(),
            });
        }
        let mut raw = vec![0u8; 32];
        write_header(&mut raw, self.msg_id, MessageType::App.nibble());
        raw[3] = u8::from(self.response_needed);
        raw[4..7].copy_from_slice(&self.elapsed_ms.to_be_bytes()[1..]);
        raw[BS_DATA_IDX..BS_DATA_IDX + self.data.len()].copy_from_slice(&self.data);
        seal(&mut raw);
        Ok(raw)
    }

    /// Parse from CRC-checked 32-byte raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        if raw.len() < 32 {
            return Err(PayloadError::TooShort {
                min: 32,
                actual: raw.len(),
            });
        }
        let (msg_id, _) = check(raw)?;
        let elapsed_ms = (u32::from(raw[4]) << 16) | (u32::from(raw[5]) << 8) | u32::from(raw[6]);
        Ok(Self {
            msg_id,
            response_needed: raw[3] != 0,
            elapsed_ms,
            data: raw[BS_DATA_IDX..32].to_vec(),
        })
    }
}

/// Protocol version carried in invite payloads.
pub const INVITE_VERSION: u8 = 0x01;

/// The invite payload a master broadcasts while adding a client.
///
/// 24 raw bytes, enciphered under the invite key rather than the
/// network key: CRC, version, assigned DID, the 16-byte network key,
/// and the master's feature block.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct InvitePayload {
    pub version: u8,
    pub assigned_did: Did,
    pub network_key: XteaKey,
    pub master_features: Features,
}

impl InvitePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![0u8; 24];
        raw[1] = self.version;
        raw[2..4].copy_from_slice(&self.assigned_did.raw().to_be_bytes());
        raw[4..20].copy_from_slice(self.network_key.as_bytes());
        raw[20..24].copy_from_slice(self.master_features.as_bytes());
        raw[0] = crc8(&raw[1..], PAYLOAD_CRC_INIT);
        raw
    }

    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        if raw.len() < 24 {
            return Err(PayloadError::TooShort {
                min: 24,
                actual: raw.len(),
            });
        }
        let computed = crc8(&raw[1..24], PAYLOAD_CRC_INIT);
        if computed != raw[0] {
            return Err(PayloadError::BadCrc {
                expected: computed,
                actual: raw[0],
            });
        }
        let did_raw = u16::from_be_bytes([raw[2], raw[3]]);
        let assigned_did = Did::new(did_raw).map_err(PayloadError::InvalidField)?;
        let mut key = [0u8; 16];
        key.copy_from_slice(&raw[4..20]);
        let mut features = [0u8; 4];
        features.copy_from_slice(&raw[20..24]);
        Ok(Self {
            version: raw[1],
            assigned_did,
            network_key: XteaKey::new(key),
            master_features: Features::new(features),
        })
    }
}
