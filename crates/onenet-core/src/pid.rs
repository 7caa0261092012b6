//! Packet-type identifiers.
//!
//! A PID travels as a raw 12-bit field: the low 6 bits select the
//! message kind, bit 6 is the stay-awake flag, bit 7 the multi-hop
//! flag, and bits 8..12 carry the payload block count. Packet and
//! payload lengths are fully determined by the PID, so classification
//! and sizing always come from the same table.

use core::fmt;

use crate::codec;
use crate::error::PacketError;

/// Message kind, the low 6 bits of a raw PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    SingleData = 0x00,
    SingleAck = 0x01,
    SingleNack = 0x02,
    RouteData = 0x03,
    RouteAck = 0x04,
    RouteNack = 0x05,
    BlockData = 0x06,
    BlockAck = 0x07,
    BlockNack = 0x08,
    BlockTerminate = 0x09,
    StreamData = 0x0A,
    StreamAck = 0x0B,
    StreamNack = 0x0C,
    StreamTerminate = 0x0D,
    InviteNewClient = 0x0E,
    InviteRequest = 0x0F,
}

impl PacketKind {
    pub fn from_low_bits(bits: u8) -> Result<Self, PacketError> {
        use PacketKind::*;
        Ok(match bits {
            0x00 => SingleData,
            0x01 => SingleAck,
            0x02 => SingleNack,
            0x03 => RouteData,
            0x04 => RouteAck,
            0x05 => RouteNack,
            0x06 => BlockData,
            0x07 => BlockAck,
            0x08 => BlockNack,
            0x09 => BlockTerminate,
            0x0A => StreamData,
            0x0B => StreamAck,
            0x0C => StreamNack,
            0x0D => StreamTerminate,
            0x0E => InviteNewClient,
            0x0F => InviteRequest,
            other => return Err(PacketError::InvalidKind(other)),
        })
    }

    pub fn low_bits(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        use PacketKind::*;
        match self {
            SingleData => "single data",
            SingleAck => "single ack",
            SingleNack => "single nack",
            RouteData => "route",
            RouteAck => "route ack",
            RouteNack => "route nack",
            BlockData => "block data",
            BlockAck => "block ack",
            BlockNack => "block nack",
            BlockTerminate => "block terminate",
            StreamData => "stream data",
            StreamAck => "stream ack",
            StreamNack => "stream nack",
            StreamTerminate => "stream terminate",
            InviteNewClient => "invite",
            InviteRequest => "invite request",
        }
    }

    pub fn is_single(self) -> bool {
        (self as u8) <= 0x02
    }

    pub fn is_route(self) -> bool {
        (0x03..=0x05).contains(&(self as u8))
    }

    pub fn is_block(self) -> bool {
        (0x06..=0x09).contains(&(self as u8))
    }

    pub fn is_stream(self) -> bool {
        (0x0A..=0x0D).contains(&(self as u8))
    }

    pub fn is_invite(self) -> bool {
        (self as u8) >= 0x0E
    }

    pub fn is_ack(self) -> bool {
        use PacketKind::*;
        matches!(self, SingleAck | RouteAck | BlockAck | StreamAck)
    }

    pub fn is_nack(self) -> bool {
        use PacketKind::*;
        matches!(self, SingleNack | RouteNack | BlockNack | StreamNack)
    }

    pub fn is_data(self) -> bool {
        use PacketKind::*;
        matches!(self, SingleData | RouteData | BlockData | StreamData)
    }

    pub fn is_terminate(self) -> bool {
        use PacketKind::*;
        matches!(self, BlockTerminate | StreamTerminate)
    }

    /// Default payload block count for this kind.
    fn default_blocks(self) -> u8 {
        use PacketKind::*;
        match self {
            BlockData | StreamData => 4,
            InviteNewClient | InviteRequest => 3,
            _ => 1,
        }
    }

    /// Valid payload block counts for this kind.
    fn blocks_valid(self, blocks: u8) -> bool {
        use PacketKind::*;
        match self {
            BlockData | StreamData => blocks == 4,
            InviteNewClient | InviteRequest => blocks == 3,
            BlockAck | BlockNack | BlockTerminate | StreamAck | StreamNack | StreamTerminate => {
                blocks == 1
            }
            // Single and route families support extended payloads.
            _ => (1..=3).contains(&blocks),
        }
    }

    /// The ACK or NACK counterpart of a data kind. Table-driven; only
    /// data kinds have one.
    fn response_kind(self, ack: bool) -> Result<PacketKind, PacketError> {
        use PacketKind::*;
        let (ack_kind, nack_kind) = match self {
            SingleData => (SingleAck, SingleNack),
            RouteData => (RouteAck, RouteNack),
            BlockData => (BlockAck, BlockNack),
            StreamData => (StreamAck, StreamNack),
            other => return Err(PacketError::NoResponseForm(other as u8)),
        };
        Ok(if ack { ack_kind } else { nack_kind })
    }
}

/// A full packet-type identifier: kind, flags, and block count.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct Pid(u16);

impl Pid {
    pub const KIND_MASK: u16 = 0x003F;
    pub const STAY_AWAKE: u16 = 0x0040;
    pub const MULTI_HOP: u16 = 0x0080;
    pub const BLOCK_COUNT_MASK: u16 = 0x0700;
    /// Set when the payload was enciphered under the sender's old key,
    /// so the receiver knows which key to try first.
    pub const OLD_KEY: u16 = 0x0800;
    const BLOCK_COUNT_SHIFT: u16 = 8;

    /// A PID for `kind` with its default block count and no flags.
    pub fn new(kind: PacketKind) -> Self {
        Pid(u16::from(kind.low_bits())
            | (u16::from(kind.default_blocks()) << Self::BLOCK_COUNT_SHIFT))
    }

    /// A PID with an explicit block count (extended single payloads).
    pub fn with_blocks(kind: PacketKind, blocks: u8) -> Result<Self, PacketError> {
        if !kind.blocks_valid(blocks) {
            return Err(PacketError::InvalidBlockCount {
                kind: kind.name(),
                count: blocks,
            });
        }
        Ok(Pid(
            u16::from(kind.low_bits()) | (u16::from(blocks) << Self::BLOCK_COUNT_SHIFT)
        ))
    }

    /// Parse a raw 12-bit PID from the wire.
    pub fn from_raw(raw: u16) -> Result<Self, PacketError> {
        let kind = PacketKind::from_low_bits((raw & Self::KIND_MASK) as u8)?;
        let blocks = ((raw & Self::BLOCK_COUNT_MASK) >> Self::BLOCK_COUNT_SHIFT) as u8;
        if blocks == 0 {
            // Count field absent: fill in the kind's default.
            return Ok(Pid(
                raw | (u16::from(kind.default_blocks()) << Self::BLOCK_COUNT_SHIFT)
            ));
        }
        if !kind.blocks_valid(blocks) {
            return Err(PacketError::InvalidBlockCount {
                kind: kind.name(),
                count: blocks,
            });
        }
        Ok(Pid(raw))
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn kind(self) -> PacketKind {
        // The low bits were validated at construction.
        match PacketKind::from_low_bits((self.0 & Self::KIND_MASK) as u8) {
            Ok(kind) => kind,
            Err(_) => PacketKind::SingleData,
        }
    }

    pub fn blocks(self) -> u8 {
        ((self.0 & Self::BLOCK_COUNT_MASK) >> Self::BLOCK_COUNT_SHIFT) as u8
    }

    pub fn stay_awake(self) -> bool {
        self.0 & Self::STAY_AWAKE != 0
    }

    pub fn multi_hop(self) -> bool {
        self.0 & Self::MULTI_HOP != 0
    }

    pub fn with_stay_awake(self, on: bool) -> Pid {
        if on {
            Pid(self.0 | Self::STAY_AWAKE)
        } else {
            Pid(self.0 & !Self::STAY_AWAKE)
        }
    }

    pub fn with_multi_hop(self, on: bool) -> Pid {
        if on {
            Pid(self.0 | Self::MULTI_HOP)
        } else {
            Pid(self.0 & !Self::MULTI_HOP)
        }
    }

    pub fn old_key(self) -> bool {
        self.0 & Self::OLD_KEY != 0
    }

    pub fn with_old_key(self, on: bool) -> Pid {
        if on {
            Pid(self.0 | Self::OLD_KEY)
        } else {
            Pid(self.0 & !Self::OLD_KEY)
        }
    }

    /// Raw (decoded, decrypted) payload length in bytes.
    pub fn raw_payload_len(self) -> usize {
        usize::from(self.blocks()) * 8
    }

    /// Encoded payload length in bytes on the wire.
    pub fn encoded_payload_len(self) -> usize {
        codec::encoded_payload_len(self.raw_payload_len())
    }

    /// The ACK or NACK PID answering this data PID. Flags are carried
    /// over; block and stream responses shrink to one payload block.
    pub fn to_response(self, ack: bool) -> Result<Pid, PacketError> {
        let kind = self.kind();
        let response = kind.response_kind(ack)?;
        let blocks = if kind.is_block() || kind.is_stream() {
            1
        } else {
            self.blocks()
        };
        let flags = self.0 & (Self::STAY_AWAKE | Self::MULTI_HOP | Self::OLD_KEY);
        Ok(Pid(u16::from(response.low_bits())
            | flags
            | (u16::from(blocks) << Self::BLOCK_COUNT_SHIFT)))
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind().name())?;
        if self.multi_hop() {
            write!(f, "+mh")?;
        }
        if self.stay_awake() {
            write!(f, "+sa")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid(0x{:03x})", self.0)
    }
}
