//! Encoded packet wire format.
//!
//! Field layout, offsets in bytes from the start of the frame:
//!
//! ```text
//! 0         4          6        7        9       15        17     19
//! +---------+----------+--------+--------+-------+---------+------+---------+------+
//! | header  | rptr DID | msgCRC | dstDID |  NID  | src DID | PID  | payload | hops |
//! |   (4)   |   (2)    |  (1)   |  (2)   |  (6)  |   (2)   | (2)  |  (var)  | (0/1)|
//! +---------+----------+--------+--------+-------+---------+------+---------+------+
//! ```
//!
//! The payload length is fixed by the PID and the hops byte is present
//! exactly when the PID's multi-hop flag is set. The message CRC covers
//! the encoded bytes from the destination DID through the end of the
//! payload; the repeater DID and hops byte are outside it because
//! repeaters rewrite them in flight.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use crate::codec;
use crate::crc;
use crate::error::{InvalidValue, PacketError};
use crate::pid::Pid;
use crate::types::{Did, NetworkId};

/// Offset of the repeater DID.
pub const RPTR_DID_IDX: usize = 4;
/// Offset of the message CRC symbol.
pub const MSG_CRC_IDX: usize = 6;
/// Offset of the destination DID.
pub const DST_DID_IDX: usize = 7;
/// Offset of the network ID.
pub const NID_IDX: usize = 9;
/// Offset of the source DID.
pub const SRC_DID_IDX: usize = 15;
/// Offset of the PID.
pub const PID_IDX: usize = 17;
/// Offset of the encoded payload.
pub const PLD_IDX: usize = 19;

/// Hop counts for a multi-hop packet. Both values are 3 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopsField {
    hops: u8,
    max_hops: u8,
}

impl HopsField {
    pub const MAX: u8 = 7;

    pub fn new(hops: u8, max_hops: u8) -> Result<Self, InvalidValue> {
        if hops > Self::MAX {
            return Err(InvalidValue {
                field: "hops",
                max: Self::MAX as u64,
                actual: hops as u64,
            });
        }
        if max_hops > Self::MAX {
            return Err(InvalidValue {
                field: "max_hops",
                max: Self::MAX as u64,
                actual: max_hops as u64,
            });
        }
        Ok(Self { hops, max_hops })
    }

    pub fn hops(self) -> u8 {
        self.hops
    }

    pub fn max_hops(self) -> u8 {
        self.max_hops
    }

    /// The field after one repeat, or `None` once the hop budget is
    /// spent.
    pub fn after_repeat(self) -> Option<HopsField> {
        if self.hops >= self.max_hops {
            None
        } else {
            Some(HopsField {
                hops: self.hops + 1,
                max_hops: self.max_hops,
            })
        }
    }
}

/// A complete encoded packet, parsed into fields or ready to serialize.
#[derive(Clone, PartialEq, Eq)]
#[must_use]
pub struct EncodedPacket {
    pub repeater: Did,
    pub dst: Did,
    pub nid: NetworkId,
    pub src: Did,
    pub pid: Pid,
    /// Encoded payload, length fixed by `pid`.
    pub payload: Vec<u8>,
    /// Present exactly when `pid.multi_hop()` is set.
    pub hops: Option<HopsField>,
}

/// Total frame length for a PID, including the 4-byte header.
#[must_use]
pub fn frame_len(pid: Pid) -> usize {
    PLD_IDX + pid.encoded_payload_len() + usize::from(pid.multi_hop())
}

impl EncodedPacket {
    /// Assemble a packet from its fields. The payload must already be
    /// encoded and sized for `pid`; `hops` must agree with the PID's
    /// multi-hop flag.
    pub fn build(
        dst: Did,
        nid: NetworkId,
        src: Did,
        pid: Pid,
        payload: Vec<u8>,
        hops: Option<HopsField>,
    ) -> Result<Self, PacketError> {
        if payload.len() != pid.encoded_payload_len() {
            return Err(PacketError::LengthMismatch {
                expected: pid.encoded_payload_len(),
                actual: payload.len(),
            });
        }
        if pid.multi_hop() != hops.is_some() {
            return Err(PacketError::InvalidField(InvalidValue {
                field: "hops presence",
                max: 1,
                actual: u64::from(hops.is_some()),
            }));
        }
        Ok(Self {
            repeater: Did::BROADCAST,
            dst,
            nid,
            src,
            pid,
            payload,
            hops,
        })
    }

    /// Serialize to wire bytes, computing the message CRC.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let total = frame_len(self.pid);
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&codec::HEADER);
        out.extend_from_slice(&codec::encode_did(self.repeater));
        out.push(0); // message CRC placeholder
        out.extend_from_slice(&codec::encode_did(self.dst));
        out.extend_from_slice(&codec::encode_nid(self.nid));
        out.extend_from_slice(&codec::encode_did(self.src));
        out.extend_from_slice(&codec::encode_pid_field(self.pid.raw()));
        out.extend_from_slice(&self.payload);

        let crc = crc::crc8(&out[DST_DID_IDX..], crc::PAYLOAD_CRC_INIT);
        out[MSG_CRC_IDX] = codec::encode_msg_crc(crc);

        if let Some(hops) = self.hops {
            out.push(codec::encode_hops(hops.hops(), hops.max_hops()));
        }
        out
    }

    /// Parse and validate a frame. Checks the header, total length
    /// against the PID, and the message CRC.
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < PLD_IDX {
            return Err(PacketError::TooShort {
                min: PLD_IDX,
                actual: bytes.len(),
            });
        }
        if bytes[..4] != codec::HEADER {
            return Err(PacketError::BadHeader);
        }

        let mut pid_field = [0u8; 2];
        pid_field.copy_from_slice(&bytes[PID_IDX..PID_IDX + 2]);
        let pid = Pid::from_raw(codec::decode_pid_field(&pid_field)?)?;

        let expected = frame_len(pid);
        if bytes.len() != expected {
            return Err(PacketError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let payload_end = PLD_IDX + pid.encoded_payload_len();
        let crc = crc::crc8(&bytes[DST_DID_IDX..payload_end], crc::PAYLOAD_CRC_INIT);
        let wire_crc = codec::decode_msg_crc(bytes[MSG_CRC_IDX])?;
        if wire_crc != crc & 0xFC {
            return Err(PacketError::BadMessageCrc {
                expected: crc & 0xFC,
                actual: wire_crc,
            });
        }

        let mut did_field = [0u8; 2];
        did_field.copy_from_slice(&bytes[RPTR_DID_IDX..RPTR_DID_IDX + 2]);
        let repeater = codec::decode_did(&did_field)?;
        did_field.copy_from_slice(&bytes[DST_DID_IDX..DST_DID_IDX + 2]);
        let dst = codec::decode_did(&did_field)?;
        did_field.copy_from_slice(&bytes[SRC_DID_IDX..SRC_DID_IDX + 2]);
        let src = codec::decode_did(&did_field)?;

        let mut nid_field = [0u8; 6];
        nid_field.copy_from_slice(&bytes[NID_IDX..NID_IDX + 6]);
        let nid = codec::decode_nid(&nid_field)?;

        let hops = if pid.multi_hop() {
            let (hops, max_hops) = codec::decode_hops(bytes[expected - 1])?;
            // 3-bit fields decode in range.
            Some(HopsField { hops, max_hops })
        } else {
            None
        };

        Ok(Self {
            repeater,
            dst,
            nid,
            src,
            pid,
            payload: bytes[PLD_IDX..payload_end].to_vec(),
            hops,
        })
    }
}

impl fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("pid", &self.pid)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("hops", &self.hops)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::PacketKind;

    fn sample_packet(pid: Pid, hops: Option<HopsField>) -> EncodedPacket {
        let raw = vec![0x5A; pid.raw_payload_len()];
        let payload = codec::encode_payload(1, &raw);
        EncodedPacket::build(
            Did::MASTER,
            NetworkId::new(0x1_2345_6789).unwrap(),
            Did::new(0x004).unwrap(),
            pid,
            payload,
            hops,
        )
        .unwrap()
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let packet = sample_packet(Pid::new(PacketKind::SingleData), None);
        let bytes = packet.serialize();
        assert_eq!(bytes.len(), PLD_IDX + 11);

        let parsed = EncodedPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn multi_hop_frame_carries_hops_byte() {
        let pid = Pid::new(PacketKind::SingleData).with_multi_hop(true);
        let hops = HopsField::new(1, 4).unwrap();
        let packet = sample_packet(pid, Some(hops));

        let bytes = packet.serialize();
        assert_eq!(bytes.len(), PLD_IDX + 11 + 1);

        let parsed = EncodedPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.hops, Some(hops));
    }

    #[test]
    fn hops_presence_must_match_pid_flag() {
        let pid = Pid::new(PacketKind::SingleData);
        let payload = codec::encode_payload(1, &[0u8; 8]);
        let err = EncodedPacket::build(
            Did::MASTER,
            NetworkId::new(1).unwrap(),
            Did::FIRST_CLIENT,
            pid,
            payload,
            Some(HopsField::new(0, 2).unwrap()),
        )
        .unwrap_err();
        assert!(matches!(err, PacketError::InvalidField(_)));
    }

    #[test]
    fn wrong_payload_length_is_rejected_at_build() {
        let pid = Pid::new(PacketKind::SingleData);
        let err = EncodedPacket::build(
            Did::MASTER,
            NetworkId::new(1).unwrap(),
            Did::FIRST_CLIENT,
            pid,
            vec![0u8; 10],
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PacketError::LengthMismatch {
                expected: 11,
                actual: 10
            }
        );
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let mut bytes = sample_packet(Pid::new(PacketKind::SingleData), None).serialize();
        bytes[3] = 0x55;
        assert_eq!(EncodedPacket::parse(&bytes).unwrap_err(), PacketError::BadHeader);
    }

    #[test]
    fn altered_message_crc_is_rejected() {
        let mut bytes = sample_packet(Pid::new(PacketKind::SingleData), None).serialize();
        let replacement = if bytes[MSG_CRC_IDX] == codec::ALPHABET[0] {
            codec::ALPHABET[1]
        } else {
            codec::ALPHABET[0]
        };
        bytes[MSG_CRC_IDX] = replacement;
        assert!(matches!(
            EncodedPacket::parse(&bytes),
            Err(PacketError::BadMessageCrc { .. })
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let bytes = sample_packet(Pid::new(PacketKind::SingleData), None).serialize();
        assert!(matches!(
            EncodedPacket::parse(&bytes[..10]),
            Err(PacketError::TooShort { .. })
        ));
        assert!(matches!(
            EncodedPacket::parse(&bytes[..bytes.len() - 1]),
            Err(PacketError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn repeat_decrements_hop_budget() {
        let hops = HopsField::new(0, 2).unwrap();
        let once = hops.after_repeat().unwrap();
        assert_eq!(once.hops(), 1);
        let twice = once.after_repeat().unwrap();
        assert_eq!(twice.hops(), 2);
        assert_eq!(twice.after_repeat(), None);
    }

    #[test]
    fn frame_len_accounts_for_blocks_and_hops() {
        assert_eq!(frame_len(Pid::new(PacketKind::SingleData)), 30);
        assert_eq!(frame_len(Pid::new(PacketKind::InviteNewClient)), 52);
        assert_eq!(frame_len(Pid::new(PacketKind::BlockData)), 62);
        assert_eq!(
            frame_len(Pid::new(PacketKind::BlockData).with_multi_hop(true)),
            63
        );
    }
}
