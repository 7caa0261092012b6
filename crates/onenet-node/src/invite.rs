//! Invite codes and the invite key.
//!
//! Adding a client starts from a shared secret typed into both devices:
//! an 8-character alphanumeric code. The invite key is the code's bytes
//! doubled to 16 bytes, and the invite packets carrying the real
//! network key are enciphered under it.

use rand::Rng;

use onenet_crypto::XteaKey;

use crate::error::NodeError;

/// Length of an invite code in characters.
pub const INVITE_CODE_LEN: usize = 8;

const CODE_ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyz";

/// An 8-character alphanumeric invite code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteCode(String);

impl InviteCode {
    pub fn new(code: &str) -> Result<Self, NodeError> {
        if code.len() != INVITE_CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(NodeError::InvalidInviteCode(code.to_string()));
        }
        Ok(Self(code.to_string()))
    }

    /// Generate a fresh code from an unambiguous alphabet (no 0/O, 1/l).
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code: String = (0..INVITE_CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The XTEA key derived from this code: the 8 code bytes, doubled.
    pub fn derive_key(&self) -> XteaKey {
        let mut bytes = [0u8; 16];
        bytes[..INVITE_CODE_LEN].copy_from_slice(self.0.as_bytes());
        bytes[INVITE_CODE_LEN..].copy_from_slice(self.0.as_bytes());
        XteaKey::new(bytes)
    }
}
