//! XTEA payload encryption and key material for the ONE-NET stack.
//!
//! Payloads are enciphered in 8-byte blocks with a 16-byte network key.
//! The key is treated as four 4-byte fragments; re-keying replaces only
//! the low fragment so a key change fits in one small admin payload.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod error;
pub mod key;
pub mod xtea;

pub use error::CryptoError;
pub use key::{KeyFragment, KeySlot, KeyStore, XteaKey, KEY_LEN, KEY_FRAGMENT_LEN};
pub use xtea::{decrypt_payload, encrypt_payload, EncryptMethod, XTEA_BLOCK_LEN};
