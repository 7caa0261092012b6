//! Network key material.
//!
//! A network key is 16 bytes, viewed as four 4-byte fragments with
//! fragment 0 at the high end and fragment 3 at the low end. Re-keying
//! replaces only the low fragment, so a rotation message carries 4 bytes
//! instead of 16. Devices hold two full keys at all times so traffic
//! enciphered under the previous key stays readable mid-rotation.

extern crate alloc;

use core::fmt;

use crate::error::CryptoError;

/// Length of a full XTEA key in bytes.
pub const KEY_LEN: usize = 16;

/// Length of one key fragment in bytes.
pub const KEY_FRAGMENT_LEN: usize = 4;

fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// A 16-byte XTEA network key.
#[derive(Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct XteaKey([u8; KEY_LEN]);

impl XteaKey {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The key as four big-endian 32-bit words, as the cipher consumes it.
    pub fn words(&self) -> [u32; 4] {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 4];
            chunk.copy_from_slice(&self.0[i * 4..i * 4 + 4]);
            *word = u32::from_be_bytes(chunk);
        }
        words
    }

    /// Fragment `index` (0 = most significant, 3 = least significant).
    pub fn fragment(&self, index: usize) -> KeyFragment {
        debug_assert!(index < 4);
        let mut frag = [0u8; KEY_FRAGMENT_LEN];
        frag.copy_from_slice(&self.0[index * 4..index * 4 + 4]);
        KeyFragment(frag)
    }

    /// A copy of this key with the low fragment (bytes 12..16) replaced.
    /// The other 12 bytes are untouched.
    pub fn with_low_fragment(&self, fragment: KeyFragment) -> XteaKey {
        let mut bytes = self.0;
        bytes[KEY_LEN - KEY_FRAGMENT_LEN..].copy_from_slice(&fragment.0);
        XteaKey(bytes)
    }
}

impl AsRef<[u8]> for XteaKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for XteaKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for XteaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XteaKey(")?;
        fmt_hex(&self.0[..2], f)?;
        write!(f, "..)")
    }
}

/// A 4-byte key fragment carried by a re-key admin message.
#[derive(Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct KeyFragment(pub(crate) [u8; KEY_FRAGMENT_LEN]);

impl KeyFragment {
    pub const fn new(bytes: [u8; KEY_FRAGMENT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_FRAGMENT_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for KeyFragment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for KeyFragment {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; KEY_FRAGMENT_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_FRAGMENT_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for KeyFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFragment(")?;
        fmt_hex(&self.0[..2], f)?;
        write!(f, "..)")
    }
}

/// Which of the two held keys a packet was enciphered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    Current,
    Old,
}

impl KeySlot {
    pub fn other(self) -> KeySlot {
        match self {
            KeySlot::Current => KeySlot::Old,
            KeySlot::Old => KeySlot::Current,
        }
    }
}

/// The current and previous network keys.
///
/// Exactly one of each exists at a time. A receiver mid-rotation tries
/// the sender's marked key first and falls back to the other on a
/// payload CRC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStore {
    current: XteaKey,
    old: XteaKey,
}

impl KeyStore {
    /// A fresh store where both slots hold the same key.
    pub fn new(key: XteaKey) -> Self {
        Self {
            current: key,
            old: key,
        }
    }

    /// Rebuild a store from both keys, as when restoring saved state.
    pub fn from_parts(current: XteaKey, old: XteaKey) -> Self {
        Self { current, old }
    }

    pub fn current(&self) -> &XteaKey {
        &self.current
    }

    pub fn old(&self) -> &XteaKey {
        &self.old
    }

    pub fn key(&self, slot: KeySlot) -> &XteaKey {
        match slot {
            KeySlot::Current => &self.current,
            KeySlot::Old => &self.old,
        }
    }

    /// Apply a low-fragment rotation: the current key moves to the old
    /// slot and the new current key differs from it only in its low
    /// 4 bytes.
    pub fn rotate(&mut self, fragment: KeyFragment) {
        self.old = self.current;
        self.current = self.current.with_low_fragment(fragment);
    }

    /// True if `fragment` already matches the current key's low fragment.
    pub fn has_fragment(&self, fragment: KeyFragment) -> bool {
        self.current.fragment(3) == fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_from_hex(s: &str) -> XteaKey {
        let bytes = hex::decode(s).unwrap();
        XteaKey::try_from(bytes.as_slice()).unwrap()
    }

    #[test]
    fn words_are_big_endian() {
        let key = key_from_hex("000102030405060708090a0b0c0d0e0f");
        assert_eq!(
            key.words(),
            [0x00010203, 0x04050607, 0x08090a0b, 0x0c0d0e0f]
        );
    }

    #[test]
    fn low_fragment_replacement_preserves_high_bytes() {
        let key = key_from_hex("000102030405060708090a0b0c0d0e0f");
        let rotated = key.with_low_fragment(KeyFragment::new([0xde, 0xad, 0xbe, 0xef]));

        assert_eq!(&rotated.as_bytes()[..12], &key.as_bytes()[..12]);
        assert_eq!(&rotated.as_bytes()[12..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rotation_keeps_prior_key_in_old_slot() {
        let key = key_from_hex("ffeeddccbbaa99887766554433221100");
        let mut store = KeyStore::new(key);

        store.rotate(KeyFragment::new([1, 2, 3, 4]));

        assert_eq!(store.old(), &key);
        assert_eq!(store.current().fragment(3), KeyFragment::new([1, 2, 3, 4]));
        assert_eq!(&store.current().as_bytes()[..12], &key.as_bytes()[..12]);
    }

    #[test]
    fn has_fragment_matches_current_low_fragment() {
        let key = key_from_hex("000102030405060708090a0b0c0d0e0f");
        let store = KeyStore::new(key);

        assert!(store.has_fragment(KeyFragment::new([0x0c, 0x0d, 0x0e, 0x0f])));
        assert!(!store.has_fragment(KeyFragment::new([0, 0, 0, 0])));
    }

    #[test]
    fn fragment_indexing() {
        let key = key_from_hex("000102030405060708090a0b0c0d0e0f");
        assert_eq!(key.fragment(0), KeyFragment::new([0x00, 0x01, 0x02, 0x03]));
        assert_eq!(key.fragment(3), KeyFragment::new([0x0c, 0x0d, 0x0e, 0x0f]));
    }

    #[test]
    fn invalid_key_length_is_rejected() {
        let err = XteaKey::try_from(&[0u8; 15][..]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 15
            }
        );
    }
}
