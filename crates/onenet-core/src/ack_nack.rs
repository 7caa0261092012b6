//! ACK/NACK response model.
//!
//! A response carries a handle nibble saying what rides along with it
//! (nothing, features, a 32-bit value, a key fragment, a bitmap of
//! received block packets, ...) and, for a NACK, a reason byte. Reason
//! codes are partitioned by range: `0x01..=0x3F` protocol non-fatal,
//! `0x40..=0x7F` application non-fatal, `0x80..=0xBF` protocol fatal,
//! `0xC0..=0xFF` application fatal. Fatality is decided purely by the
//! range.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use onenet_crypto::KeyFragment;

use crate::error::{InvalidValue, PayloadError};
use crate::features::Features;
use crate::payload::{check, seal, write_header};
use crate::types::MessageId;

/// A NACK reason code.
///
/// A newtype rather than an enum: user-defined ranges make every byte
/// value meaningful, and fatality is a property of the range.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct NackReason(pub u8);

impl NackReason {
    pub const NO_ERROR: NackReason = NackReason(0x00);

    // Protocol non-fatal (0x01..=0x3F).
    pub const BAD_CRC: NackReason = NackReason(0x01);
    pub const RSRC_FULL: NackReason = NackReason(0x02);
    pub const INTERNAL_ERR: NackReason = NackReason(0x03);
    pub const BUSY: NackReason = NackReason(0x04);
    pub const NO_RESPONSE: NackReason = NackReason(0x05);
    pub const INVALID_MSG_ID: NackReason = NackReason(0x06);
    pub const BUSY_TRY_AGAIN: NackReason = NackReason(0x07);
    pub const BAD_ADDRESS_ERR: NackReason = NackReason(0x08);
    pub const INVALID_LENGTH_ERR: NackReason = NackReason(0x09);
    pub const INVALID_CHUNK_SIZE: NackReason = NackReason(0x0E);
    pub const INVALID_CHUNK_INDEX: NackReason = NackReason(0x0F);
    pub const INVALID_BYTE_INDEX: NackReason = NackReason(0x10);
    pub const TIMEOUT: NackReason = NackReason(0x11);
    pub const NO_RESPONSE_AFTER_RETRIES: NackReason = NackReason(0x12);
    pub const BAD_KEY_FRAGMENT: NackReason = NackReason(0x17);
    pub const ALREADY_IN_PROGRESS: NackReason = NackReason(0x1B);

    // Protocol fatal (0x80..=0xBF).
    pub const BAD_ADDRESS: NackReason = NackReason(0x80);
    pub const DEVICE_NOT_CAPABLE: NackReason = NackReason(0x82);
    pub const UNIT_FUNCTION_UNSUPPORTED: NackReason = NackReason(0x83);
    pub const INVALID_UNIT: NackReason = NackReason(0x84);
    pub const BAD_DATA: NackReason = NackReason(0x88);
    pub const TRANSACTION_ABORTED: NackReason = NackReason(0x8A);
    pub const PERMISSION_DENIED: NackReason = NackReason(0x8D);

    pub fn raw(self) -> u8 {
        self.0
    }

    /// Fatal reasons must not be retried by the generic engine.
    pub fn is_fatal(self) -> bool {
        self.0 >= 0x80
    }

    /// Reasons in the application-defined ranges.
    pub fn is_application(self) -> bool {
        matches!(self.0, 0x40..=0x7F | 0xC0..=0xFF)
    }

    pub fn is_no_error(self) -> bool {
        self == Self::NO_ERROR
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl fmt::Debug for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NackReason(0x{:02x})", self.0)
    }
}

/// What a response carries besides its verdict. One enum for both ACK
/// and NACK; the verdict lives on [`AckNack`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseHandle {
    NoPayload = 0x0,
    Features = 0x1,
    Data = 0x2,
    Value = 0x3,
    TimeMs = 0x4,
    TimeoutMs = 0x5,
    SlowDownTimeMs = 0x6,
    SpeedUpTimeMs = 0x7,
    PauseTimeMs = 0x8,
    ResponseTimeMs = 0x9,
    KeyFragment = 0xA,
    BlockPacketsReceived = 0xB,
    Route = 0xC,
    AppMessage = 0xD,
    AdminMessage = 0xE,
    Application = 0xF,
}

impl ResponseHandle {
    pub fn from_nibble(nibble: u8) -> Result<Self, PayloadError> {
        use ResponseHandle::*;
        Ok(match nibble {
            0x0 => NoPayload,
            0x1 => Features,
            0x2 => Data,
            0x3 => Value,
            0x4 => TimeMs,
            0x5 => TimeoutMs,
            0x6 => SlowDownTimeMs,
            0x7 => SpeedUpTimeMs,
            0x8 => PauseTimeMs,
            0x9 => ResponseTimeMs,
            0xA => KeyFragment,
            0xB => BlockPacketsReceived,
            0xC => Route,
            0xD => AppMessage,
            0xE => AdminMessage,
            0xF => Application,
            other => return Err(PayloadError::InvalidHandle(other)),
        })
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }

    /// Handles whose payload is a 32-bit time in milliseconds.
    pub fn is_time(self) -> bool {
        use ResponseHandle::*;
        matches!(
            self,
            TimeMs | TimeoutMs | SlowDownTimeMs | SpeedUpTimeMs | PauseTimeMs | ResponseTimeMs
        )
    }
}

/// Bitmap of block packets received within one 40-packet chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ChunkMask([u8; 5]);

impl ChunkMask {
    pub const LEN: usize = 5;
    pub const MAX_PACKETS: u8 = 40;

    pub const fn empty() -> Self {
        Self([0; 5])
    }

    pub const fn from_bytes(bytes: [u8; 5]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 5] {
        &self.0
    }

    pub fn set(&mut self, idx: u8) {
        if idx < Self::MAX_PACKETS {
            self.0[usize::from(idx / 8)] |= 1 << (idx % 8);
        }
    }

    pub fn is_set(&self, idx: u8) -> bool {
        idx < Self::MAX_PACKETS && self.0[usize::from(idx / 8)] & (1 << (idx % 8)) != 0
    }

    pub fn count(&self) -> u8 {
        self.0.iter().map(|b| b.count_ones() as u8).sum()
    }

    /// Indices below `size` that are still missing.
    pub fn missing(&self, size: u8) -> Vec<u8> {
        (0..size.min(Self::MAX_PACKETS))
            .filter(|&i| !self.is_set(i))
            .collect()
    }

    pub fn is_complete(&self, size: u8) -> bool {
        self.missing(size).is_empty()
    }
}

/// Payload attached to an ACK or NACK, matching its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckNackPayload {
    Empty,
    Features(Features),
    Data(Vec<u8>),
    Value(u32),
    /// Payload for every time-flavored handle.
    TimeMs(u32),
    KeyFragment(KeyFragment),
    PacketsReceived(ChunkMask),
    /// An encoded route list, passed through opaquely.
    Route(Vec<u8>),
    AppMessage(Vec<u8>),
    AdminMessage(Vec<u8>),
    Application(Vec<u8>),
}

/// A decoded ACK or NACK.
///
/// `nack_reason` is `None` for an ACK. The handle and payload are
/// shared between both verdicts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct AckNack {
    pub nack_reason: Option<NackReason>,
    pub handle: ResponseHandle,
    pub payload: AckNackPayload,
}

impl AckNack {
    pub fn ack() -> Self {
        Self {
            nack_reason: None,
            handle: ResponseHandle::NoPayload,
            payload: AckNackPayload::Empty,
        }
    }

    pub fn ack_with(handle: ResponseHandle, payload: AckNackPayload) -> Self {
        Self {
            nack_reason: None,
            handle,
            payload,
        }
    }

    pub fn nack(reason: NackReason) -> Self {
        Self {
            nack_reason: Some(reason),
            handle: ResponseHandle::NoPayload,
            payload: AckNackPayload::Empty,
        }
    }

    pub fn nack_with(reason: NackReason, handle: ResponseHandle, payload: AckNackPayload) -> Self {
        Self {
            nack_reason: Some(reason),
            handle,
            payload,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.nack_reason.is_none()
    }

    /// True for a NACK whose reason must not be retried.
    pub fn is_fatal(&self) -> bool {
        self.nack_reason.is_some_and(NackReason::is_fatal)
    }

    fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            AckNackPayload::Empty => Vec::new(),
            AckNackPayload::Features(features) => features.as_bytes().to_vec(),
            AckNackPayload::Value(v) | AckNackPayload::TimeMs(v) => v.to_be_bytes().to_vec(),
            AckNackPayload::KeyFragment(frag) => frag.as_bytes().to_vec(),
            AckNackPayload::PacketsReceived(mask) => mask.as_bytes().to_vec(),
            AckNackPayload::Data(bytes)
            | AckNackPayload::Route(bytes)
            | AckNackPayload::AppMessage(bytes)
            | AckNackPayload::AdminMessage(bytes)
            | AckNackPayload::Application(bytes) => bytes.clone(),
        }
    }

    /// Encode into `blocks * 8` raw bytes with CRC set. The NACK
    /// reason, when present, occupies byte 3 and shifts the payload to
    /// byte 4.
    pub fn encode(&self, msg_id: MessageId, blocks: u8) -> Result<Vec<u8>, PayloadError> {
        let len = usize::from(blocks) * 8;
        let body = self.payload_bytes();
        let start = if self.is_ack() { 3 } else { 4 };
        if start + body.len() > len {
            return Err(PayloadError::DataTooLong {
                max: len - start,
                actual: body.len(),
            });
        }

        let mut raw = vec![0u8; len];
        write_header(&mut raw, msg_id, self.handle.nibble());
        if let Some(reason) = self.nack_reason {
            raw[3] = reason.raw();
        }
        raw[start..start + body.len()].copy_from_slice(&body);
        seal(&mut raw);
        Ok(raw)
    }

    /// Parse from CRC-checked raw bytes. `is_nack` comes from the PID.
    pub fn parse(raw: &[u8], is_nack: bool) -> Result<(MessageId, Self), PayloadError> {
        let (msg_id, nibble) = check(raw)?;
        let handle = ResponseHandle::from_nibble(nibble)?;

        let (nack_reason, body) = if is_nack {
            if raw.len() < 4 {
                return Err(PayloadError::TooShort {
                    min: 4,
                    actual: raw.len(),
                });
            }
            (Some(NackReason(raw[3])), &raw[4..])
        } else {
            (None, &raw[3..])
        };

        let need = |n: usize| -> Result<(), PayloadError> {
            if body.len() < n {
                Err(PayloadError::TooShort {
                    min: n,
                    actual: body.len(),
                })
            } else {
                Ok(())
            }
        };

        let payload = match handle {
            ResponseHandle::NoPayload => AckNackPayload::Empty,
            ResponseHandle::Features => {
                need(4)?;
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&body[..4]);
                AckNackPayload::Features(Features::new(bytes))
            }
            ResponseHandle::Value => {
                need(4)?;
                AckNackPayload::Value(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
            }
            ResponseHandle::TimeMs
            | ResponseHandle::TimeoutMs
            | ResponseHandle::SlowDownTimeMs
            | ResponseHandle::SpeedUpTimeMs
            | ResponseHandle::PauseTimeMs
            | ResponseHandle::ResponseTimeMs => {
                need(4)?;
                AckNackPayload::TimeMs(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
            }
            ResponseHandle::KeyFragment => {
                need(4)?;
                let frag = KeyFragment::try_from(&body[..4]).map_err(|_| {
                    PayloadError::InvalidField(InvalidValue {
                        field: "key fragment",
                        max: 4,
                        actual: body.len() as u64,
                    })
                })?;
                AckNackPayload::KeyFragment(frag)
            }
            ResponseHandle::BlockPacketsReceived => {
                need(ChunkMask::LEN)?;
                let mut bytes = [0u8; ChunkMask::LEN];
                bytes.copy_from_slice(&body[..ChunkMask::LEN]);
                AckNackPayload::PacketsReceived(ChunkMask::from_bytes(bytes))
            }
            ResponseHandle::Data => AckNackPayload::Data(body.to_vec()),
            ResponseHandle::Route => AckNackPayload::Route(body.to_vec()),
            ResponseHandle::AppMessage => AckNackPayload::AppMessage(body.to_vec()),
            ResponseHandle::AdminMessage => AckNackPayload::AdminMessage(body.to_vec()),
            ResponseHandle::Application => AckNackPayload::Application(body.to_vec()),
        };

        Ok((
            msg_id,
            Self {
                nack_reason,
                handle,
                payload,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_id(raw: u16) -> MessageId {
        MessageId::new(raw).unwrap()
    }

    #[test]
    fn fatality_is_decided_by_range() {
        assert!(!NackReason::NO_ERROR.is_fatal());
        for raw in 0x01..=0x7Fu8 {
            assert!(!NackReason(raw).is_fatal(), "0x{raw:02x} must be non-fatal");
        }
        for raw in 0x80..=0xFFu8 {
            assert!(NackReason(raw).is_fatal(), "0x{raw:02x} must be fatal");
        }
    }

    #[test]
    fn application_ranges() {
        assert!(NackReason(0x40).is_application());
        assert!(NackReason(0xC0).is_application());
        assert!(!NackReason::BAD_CRC.is_application());
        assert!(!NackReason::BAD_ADDRESS.is_application());
    }

    #[test]
    fn plain_ack_roundtrip() {
        let ack = AckNack::ack();
        let raw = ack.encode(msg_id(42), 1).unwrap();
        assert_eq!(raw.len(), 8);

        let (id, parsed) = AckNack::parse(&raw, false).unwrap();
        assert_eq!(id.raw(), 42);
        assert!(parsed.is_ack());
        assert_eq!(parsed.handle, ResponseHandle::NoPayload);
    }

    #[test]
    fn nack_reason_rides_byte_three() {
        let nack = AckNack::nack(NackReason::INVALID_MSG_ID);
        let raw = nack.encode(msg_id(7), 1).unwrap();
        assert_eq!(raw[3], 0x06);

        let (_, parsed) = AckNack::parse(&raw, true).unwrap();
        assert_eq!(parsed.nack_reason, Some(NackReason::INVALID_MSG_ID));
        assert!(!parsed.is_fatal());
    }

    #[test]
    fn time_handles_carry_a_millisecond_value() {
        let ack = AckNack::ack_with(
            ResponseHandle::SlowDownTimeMs,
            AckNackPayload::TimeMs(1500),
        );
        let raw = ack.encode(msg_id(1), 1).unwrap();
        let (_, parsed) = AckNack::parse(&raw, false).unwrap();
        assert_eq!(parsed.handle, ResponseHandle::SlowDownTimeMs);
        assert_eq!(parsed.payload, AckNackPayload::TimeMs(1500));
    }

    #[test]
    fn key_fragment_roundtrip() {
        let frag = KeyFragment::new([9, 8, 7, 6]);
        let ack = AckNack::ack_with(ResponseHandle::KeyFragment, AckNackPayload::KeyFragment(frag));
        let raw = ack.encode(msg_id(9), 1).unwrap();
        let (_, parsed) = AckNack::parse(&raw, false).unwrap();
        assert_eq!(parsed.payload, AckNackPayload::KeyFragment(frag));
    }

    #[test]
    fn chunk_mask_in_block_ack() {
        let mut mask = ChunkMask::empty();
        for idx in [0u8, 1, 5, 39] {
            mask.set(idx);
        }
        let ack = AckNack::ack_with(
            ResponseHandle::BlockPacketsReceived,
            AckNackPayload::PacketsReceived(mask),
        );
        let raw = ack.encode(msg_id(3), 1).unwrap();
        let (_, parsed) = AckNack::parse(&raw, false).unwrap();
        assert_eq!(parsed.payload, AckNackPayload::PacketsReceived(mask));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let nack = AckNack::nack_with(
            NackReason::BAD_DATA,
            ResponseHandle::BlockPacketsReceived,
            AckNackPayload::PacketsReceived(ChunkMask::empty()),
        );
        // 4 (header + reason) + 5 > 8.
        assert!(matches!(
            nack.encode(msg_id(0), 1),
            Err(PayloadError::DataTooLong { .. })
        ));
    }

    #[test]
    fn chunk_mask_tracks_missing_packets() {
        let mut mask = ChunkMask::empty();
        mask.set(0);
        mask.set(2);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.missing(4), vec![1, 3]);
        assert!(!mask.is_complete(4));

        mask.set(1);
        mask.set(3);
        assert!(mask.is_complete(4));
        assert!(!mask.is_set(40));
    }
}
