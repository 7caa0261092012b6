//! Error types for the onenet-crypto crate.

use core::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Payload length is not a whole number of XTEA blocks.
    InvalidPayloadLength { actual: usize },

    /// The 2-bit encryption method field held a value with no meaning.
    InvalidMethod(u8),

    /// Key material had the wrong length.
    InvalidKeyLength { expected: usize, actual: usize },
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidPayloadLength { actual } => {
                write!(f, "payload length {actual} is not a multiple of 8")
            }
            CryptoError::InvalidMethod(v) => write!(f, "invalid encryption method: {v}"),
            CryptoError::InvalidKeyLength { expected, actual } => {
                write!(f, "invalid key length: expected {expected}, got {actual}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}
