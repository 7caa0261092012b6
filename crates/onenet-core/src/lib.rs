//! Core wire types and packet formats for the ONE-NET network stack.
//!
//! This crate defines the addressing newtypes, the 6-bit transmission
//! codec and CRC, the packet-type identifier tables, the encoded packet
//! wire format, raw payload layouts, the ACK/NACK response model, device
//! feature flags, and admin message formats.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod ack_nack;
pub mod admin;
pub mod codec;
pub mod crc;
pub mod error;
pub mod features;
pub mod packet;
pub mod payload;
pub mod pid;
pub mod types;

pub use ack_nack::{AckNack, AckNackPayload, ChunkMask, NackReason, ResponseHandle};
pub use admin::{AdminMessage, AdminType, BlockStreamRequest};
pub use error::{CodecError, InvalidValue, PacketError, PayloadError};
pub use features::Features;
pub use packet::{EncodedPacket, HopsField};
pub use payload::{BlockPayload, InvitePayload, MessageType, SinglePayload, StreamPayload};
pub use pid::{PacketKind, Pid};
pub use types::{Did, MessageId, NetworkId, Priority, UnitId};
