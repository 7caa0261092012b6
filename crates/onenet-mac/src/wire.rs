//! Sealing and opening frames: encrypt + encode on the way out,
//! decode + decrypt + CRC-check on the way in.
//!
//! Opening tries the key the sender marked in the PID first and falls
//! back to the other key on a payload CRC failure, which is what keeps
//! traffic flowing mid-rotation.

use onenet_core::codec;
use onenet_core::error::PayloadError;
use onenet_core::packet::{EncodedPacket, HopsField};
use onenet_core::payload;
use onenet_core::pid::Pid;
use onenet_core::types::{Did, NetworkId};
use onenet_crypto::{decrypt_payload, encrypt_payload, EncryptMethod, KeySlot, KeyStore, XteaKey};

use crate::error::MacError;

/// Encrypt a sealed raw payload and assemble a full wire frame.
pub fn seal_frame(
    dst: Did,
    nid: NetworkId,
    src: Did,
    pid: Pid,
    raw_payload: &[u8],
    key: &XteaKey,
    hops: Option<HopsField>,
) -> Result<Vec<u8>, MacError> {
    let method = EncryptMethod::for_blocks(pid.blocks());
    let mut encrypted = raw_payload.to_vec();
    encrypt_payload(&mut encrypted, method, key)?;

    let encoded = codec::encode_payload(method.bits(), &encrypted);
    let packet = EncodedPacket::build(dst, nid, src, pid, encoded, hops)?;
    Ok(packet.serialize())
}

/// Seal a frame under an explicit key slot, marking the slot in the
/// PID so the receiver tries the right key first.
pub fn seal_frame_with_slot(
    dst: Did,
    nid: NetworkId,
    src: Did,
    pid: Pid,
    raw_payload: &[u8],
    keys: &KeyStore,
    slot: KeySlot,
    hops: Option<HopsField>,
) -> Result<Vec<u8>, MacError> {
    let pid = pid.with_old_key(slot == KeySlot::Old);
    seal_frame(dst, nid, src, pid, raw_payload, keys.key(slot), hops)
}

/// Decode and decrypt a received packet's payload, verifying the
/// payload CRC. Returns the raw bytes and the key slot that worked.
pub fn open_frame(packet: &EncodedPacket, keys: &KeyStore) -> Result<(Vec<u8>, KeySlot), MacError> {
    let raw_len = packet.pid.raw_payload_len();
    let (method_bits, encrypted) = codec::decode_payload(&packet.payload, raw_len)?;
    let method = EncryptMethod::from_bits(method_bits)?;

    let preferred = if packet.pid.old_key() {
        KeySlot::Old
    } else {
        KeySlot::Current
    };

    match try_open(&encrypted, method, keys.key(preferred)) {
        Ok(raw) => Ok((raw, preferred)),
        Err(PayloadError::BadCrc { .. }) => {
            let fallback = preferred.other();
            let raw = try_open(&encrypted, method, keys.key(fallback))?;
            Ok((raw, fallback))
        }
        Err(e) => Err(e.into()),
    }
}

/// Open a frame with a single explicit key (invite traffic).
pub fn open_frame_with_key(packet: &EncodedPacket, key: &XteaKey) -> Result<Vec<u8>, MacError> {
    let raw_len = packet.pid.raw_payload_len();
    let (method_bits, encrypted) = codec::decode_payload(&packet.payload, raw_len)?;
    let method = EncryptMethod::from_bits(method_bits)?;
    Ok(try_open(&encrypted, method, key)?)
}

fn try_open(
    encrypted: &[u8],
    method: EncryptMethod,
    key: &XteaKey,
) -> Result<Vec<u8>, PayloadError> {
    let mut raw = encrypted.to_vec();
    decrypt_payload(&mut raw, method, key)?;
    payload::check(&raw)?;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use onenet_core::payload::{MessageType, SinglePayload};
    use onenet_core::pid::PacketKind;
    use onenet_core::types::MessageId;
    use onenet_crypto::KeyFragment;

    fn nid() -> NetworkId {
        NetworkId::new(0xABCDE0123).unwrap()
    }

    fn keys() -> KeyStore {
        KeyStore::new(XteaKey::new([7u8; 16]))
    }

    fn raw_single() -> Vec<u8> {
        SinglePayload {
            msg_id: MessageId::new(10).unwrap(),
            msg_type: MessageType::App,
            data: vec![1, 2, 3],
        }
        .encode(1)
        .unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let pid = Pid::new(PacketKind::SingleData);
        let raw = raw_single();
        let frame = seal_frame(
            Did::MASTER,
            nid(),
            Did::FIRST_CLIENT,
            pid,
            &raw,
            keys().current(),
            None,
        )
        .unwrap();

        let packet = EncodedPacket::parse(&frame).unwrap();
        let (opened, slot) = open_frame(&packet, &keys()).unwrap();
        assert_eq!(opened, raw);
        assert_eq!(slot, KeySlot::Current);
    }

    #[test]
    fn old_key_marker_steers_decryption() {
        let mut store = keys();
        store.rotate(KeyFragment::new([9, 9, 9, 9]));

        let pid = Pid::new(PacketKind::SingleData);
        let raw = raw_single();
        let frame = seal_frame_with_slot(
            Did::MASTER,
            nid(),
            Did::FIRST_CLIENT,
            pid,
            &raw,
            &store,
            KeySlot::Old,
            None,
        )
        .unwrap();

        let packet = EncodedPacket::parse(&frame).unwrap();
        assert!(packet.pid.old_key());
        let (opened, slot) = open_frame(&packet, &store).unwrap();
        assert_eq!(opened, raw);
        assert_eq!(slot, KeySlot::Old);
    }

    #[test]
    fn fallback_key_recovers_unmarked_rotation() {
        // Receiver has rotated; sender still enciphers under what is
        // now the receiver's old key without marking it.
        let mut receiver = keys();
        receiver.rotate(KeyFragment::new([1, 2, 3, 4]));

        let pid = Pid::new(PacketKind::SingleData);
        let raw = raw_single();
        let frame = seal_frame(
            Did::MASTER,
            nid(),
            Did::FIRST_CLIENT,
            pid,
            &raw,
            receiver.old(),
            None,
        )
        .unwrap();

        let packet = EncodedPacket::parse(&frame).unwrap();
        let (opened, slot) = open_frame(&packet, &receiver).unwrap();
        assert_eq!(opened, raw);
        assert_eq!(slot, KeySlot::Old);
    }

    #[test]
    fn wrong_key_everywhere_is_a_crc_failure() {
        let pid = Pid::new(PacketKind::SingleData);
        let frame = seal_frame(
            Did::MASTER,
            nid(),
            Did::FIRST_CLIENT,
            pid,
            &raw_single(),
            &XteaKey::new([0x55; 16]),
            None,
        )
        .unwrap();

        let packet = EncodedPacket::parse(&frame).unwrap();
        match open_frame(&packet, &keys()) {
            Err(MacError::Payload(PayloadError::BadCrc { .. })) => {}
            Ok((raw, _)) => assert_ne!(raw, raw_single()),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
