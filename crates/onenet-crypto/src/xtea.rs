//! XTEA block cipher over raw payloads.
//!
//! Payloads are a whole number of 8-byte blocks and are enciphered in
//! ECB fashion: each block independently, with one, two, or three passes
//! of the 32-round XTEA core depending on the encryption method. The
//! method travels in the two spare bits at the front of the encoded
//! payload, so both sides always agree on how to undo it.

use crate::error::CryptoError;
use crate::key::XteaKey;

/// XTEA block length in bytes.
pub const XTEA_BLOCK_LEN: usize = 8;

const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 32;

/// Payload encryption method, carried as a 2-bit field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptMethod {
    /// No encryption. Test networks only.
    None = 0,
    /// One XTEA pass per block. Used for one-block payloads.
    Xtea1 = 1,
    /// Two passes per block. Used for multi-block payloads.
    Xtea2 = 2,
    /// Three passes per block.
    Xtea3 = 3,
}

impl EncryptMethod {
    pub fn from_bits(bits: u8) -> Result<Self, CryptoError> {
        match bits {
            0 => Ok(EncryptMethod::None),
            1 => Ok(EncryptMethod::Xtea1),
            2 => Ok(EncryptMethod::Xtea2),
            3 => Ok(EncryptMethod::Xtea3),
            other => Err(CryptoError::InvalidMethod(other)),
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Number of XTEA passes applied to each block.
    pub fn passes(self) -> u32 {
        self as u32
    }

    /// The method used for a payload of `blocks` XTEA blocks.
    pub fn for_blocks(blocks: u8) -> Self {
        if blocks <= 1 {
            EncryptMethod::Xtea1
        } else {
            EncryptMethod::Xtea2
        }
    }
}

/// Encipher one 8-byte block in place.
pub fn encipher_block(block: &mut [u8; XTEA_BLOCK_LEN], key: &XteaKey) {
    let words = key.words();
    let mut v0 = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
    let mut v1 = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
    let mut sum: u32 = 0;

    for _ in 0..ROUNDS {
        v0 = v0.wrapping_add(
            ((v1 << 4) ^ (v1 >> 5))
                .wrapping_add(v1)
                ^ sum.wrapping_add(words[(sum & 3) as usize]),
        );
        sum = sum.wrapping_add(DELTA);
        v1 = v1.wrapping_add(
            ((v0 << 4) ^ (v0 >> 5))
                .wrapping_add(v0)
                ^ sum.wrapping_add(words[((sum >> 11) & 3) as usize]),
        );
    }

    block[..4].copy_from_slice(&v0.to_be_bytes());
    block[4..].copy_from_slice(&v1.to_be_bytes());
}

/// Decipher one 8-byte block in place.
pub fn decipher_block(block: &mut [u8; XTEA_BLOCK_LEN], key: &XteaKey) {
    let words = key.words();
    let mut v0 = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
    let mut v1 = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
    let mut sum: u32 = DELTA.wrapping_mul(ROUNDS);

    for _ in 0..ROUNDS {
        v1 = v1.wrapping_sub(
            ((v0 << 4) ^ (v0 >> 5))
                .wrapping_add(v0)
                ^ sum.wrapping_add(words[((sum >> 11) & 3) as usize]),
        );
        sum = sum.wrapping_sub(DELTA);
        v0 = v0.wrapping_sub(
            ((v1 << 4) ^ (v1 >> 5))
                .wrapping_add(v1)
                ^ sum.wrapping_add(words[(sum & 3) as usize]),
        );
    }

    block[..4].copy_from_slice(&v0.to_be_bytes());
    block[4..].copy_from_slice(&v1.to_be_bytes());
}

/// Encrypt a raw payload in place.
///
/// The payload length must be a whole number of blocks. Every packet
/// family pads its raw payload to its block count before this is called.
pub fn encrypt_payload(
    payload: &mut [u8],
    method: EncryptMethod,
    key: &XteaKey,
) -> Result<(), CryptoError> {
    if payload.len() % XTEA_BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidPayloadLength {
            actual: payload.len(),
        });
    }

    for chunk in payload.chunks_exact_mut(XTEA_BLOCK_LEN) {
        let mut block = [0u8; XTEA_BLOCK_LEN];
        block.copy_from_slice(chunk);
        for _ in 0..method.passes() {
            encipher_block(&mut block, key);
        }
        chunk.copy_from_slice(&block);
    }
    Ok(())
}

/// Decrypt a raw payload in place. Inverse of [`encrypt_payload`].
pub fn decrypt_payload(
    payload: &mut [u8],
    method: EncryptMethod,
    key: &XteaKey,
) -> Result<(), CryptoError> {
    if payload.len() % XTEA_BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidPayloadLength {
            actual: payload.len(),
        });
    }

    for chunk in payload.chunks_exact_mut(XTEA_BLOCK_LEN) {
        let mut block = [0u8; XTEA_BLOCK_LEN];
        block.copy_from_slice(chunk);
        for _ in 0..method.passes() {
            decipher_block(&mut block, key);
        }
        chunk.copy_from_slice(&block);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> XteaKey {
        let bytes = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        XteaKey::try_from(bytes.as_slice()).unwrap()
    }

    #[test]
    fn block_roundtrip() {
        let key = test_key();
        let original = [0x41u8, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48];

        let mut block = original;
        encipher_block(&mut block, &key);
        assert_ne!(block, original);

        decipher_block(&mut block, &key);
        assert_eq!(block, original);
    }

    #[test]
    fn known_vector() {
        // Standard XTEA test vector: all-zero key, all-zero plaintext.
        let key = XteaKey::new([0u8; 16]);
        let mut block = [0u8; 8];
        encipher_block(&mut block, &key);
        assert_eq!(hex::encode(block), "dee9d4d8f7131ed9");
    }

    #[test]
    fn method_none_is_identity() {
        let key = test_key();
        let mut payload = [0x11u8; 16];
        encrypt_payload(&mut payload, EncryptMethod::None, &key).unwrap();
        assert_eq!(payload, [0x11u8; 16]);
    }

    #[test]
    fn uneven_payload_is_rejected() {
        let key = test_key();
        let mut payload = [0u8; 9];
        let err = encrypt_payload(&mut payload, EncryptMethod::Xtea1, &key).unwrap_err();
        assert_eq!(err, CryptoError::InvalidPayloadLength { actual: 9 });
    }

    #[test]
    fn method_bits_roundtrip() {
        for bits in 0..4u8 {
            assert_eq!(EncryptMethod::from_bits(bits).unwrap().bits(), bits);
        }
        assert!(EncryptMethod::from_bits(4).is_err());
    }

    #[test]
    fn multi_block_method_selection() {
        assert_eq!(EncryptMethod::for_blocks(1), EncryptMethod::Xtea1);
        assert_eq!(EncryptMethod::for_blocks(3), EncryptMethod::Xtea2);
        assert_eq!(EncryptMethod::for_blocks(4), EncryptMethod::Xtea2);
    }

    #[test]
    fn different_keys_give_different_ciphertext() {
        let mut a = [0x55u8; 8];
        let mut b = [0x55u8; 8];
        encipher_block(&mut a, &test_key());
        encipher_block(&mut b, &XteaKey::new([0xFFu8; 16]));
        assert_ne!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn payload_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 8..=32),
            key_bytes in any::<[u8; 16]>(),
            method_bits in 1u8..4,
        ) {
            // Trim to a whole number of blocks.
            let len = data.len() / 8 * 8;
            let mut payload = data[..len].to_vec();
            let original = payload.clone();
            let key = XteaKey::new(key_bytes);
            let method = EncryptMethod::from_bits(method_bits).unwrap();

            encrypt_payload(&mut payload, method, &key).unwrap();
            prop_assert_ne!(&payload, &original);
            decrypt_payload(&mut payload, method, &key).unwrap();
            prop_assert_eq!(payload, original);
        }
    }
}
