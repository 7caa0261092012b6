//! Error types for the onenet-core crate.

use core::fmt;

use onenet_crypto::CryptoError;

/// A field was constructed from a value outside its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidValue {
    pub field: &'static str,
    pub max: u64,
    pub actual: u64,
}

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} out of range: max 0x{:03x}, got 0x{:03x}",
            self.field, self.max, self.actual
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidValue {}

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    /// A byte from the wire is not one of the 64 transmission symbols.
    InvalidSymbol(u8),
    InvalidLength { expected: usize, actual: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidSymbol(v) => write!(f, "invalid transmission symbol: 0x{v:02x}"),
            CodecError::InvalidLength { expected, actual } => {
                write!(f, "invalid encoded length: expected {expected}, got {actual}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

#[derive(Debug, PartialEq, Eq)]
pub enum PacketError {
    TooShort { min: usize, actual: usize },
    LengthMismatch { expected: usize, actual: usize },
    InvalidKind(u8),
    InvalidBlockCount { kind: &'static str, count: u8 },
    /// The packet kind has no ACK/NACK counterpart.
    NoResponseForm(u8),
    BadHeader,
    BadMessageCrc { expected: u8, actual: u8 },
    InvalidField(InvalidValue),
    Codec(CodecError),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::TooShort { min, actual } => {
                write!(f, "packet too short: need at least {min} bytes, got {actual}")
            }
            PacketError::LengthMismatch { expected, actual } => {
                write!(f, "packet length mismatch: expected {expected}, got {actual}")
            }
            PacketError::InvalidKind(v) => write!(f, "invalid packet kind: 0x{v:02x}"),
            PacketError::InvalidBlockCount { kind, count } => {
                write!(f, "invalid payload block count for {kind}: {count}")
            }
            PacketError::NoResponseForm(v) => {
                write!(f, "packet kind 0x{v:02x} has no ACK/NACK form")
            }
            PacketError::BadHeader => write!(f, "bad preamble/header"),
            PacketError::BadMessageCrc { expected, actual } => {
                write!(
                    f,
                    "message CRC mismatch: expected 0x{expected:02x}, got 0x{actual:02x}"
                )
            }
            PacketError::InvalidField(e) => write!(f, "{e}"),
            PacketError::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl From<CodecError> for PacketError {
    fn from(e: CodecError) -> Self {
        PacketError::Codec(e)
    }
}

impl From<InvalidValue> for PacketError {
    fn from(e: InvalidValue) -> Self {
        PacketError::InvalidField(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PacketError {}

#[derive(Debug, PartialEq, Eq)]
pub enum PayloadError {
    TooShort { min: usize, actual: usize },
    DataTooLong { max: usize, actual: usize },
    BadCrc { expected: u8, actual: u8 },
    InvalidMessageType(u8),
    InvalidHandle(u8),
    InvalidAdminType(u8),
    InvalidField(InvalidValue),
    Crypto(CryptoError),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::TooShort { min, actual } => {
                write!(f, "payload too short: need at least {min} bytes, got {actual}")
            }
            PayloadError::DataTooLong { max, actual } => {
                write!(f, "payload data too long: max {max} bytes, got {actual}")
            }
            PayloadError::BadCrc { expected, actual } => {
                write!(
                    f,
                    "payload CRC mismatch: expected 0x{expected:02x}, got 0x{actual:02x}"
                )
            }
            PayloadError::InvalidMessageType(v) => write!(f, "invalid message type: 0x{v:x}"),
            PayloadError::InvalidHandle(v) => write!(f, "invalid response handle: 0x{v:x}"),
            PayloadError::InvalidAdminType(v) => write!(f, "invalid admin type: 0x{v:02x}"),
            PayloadError::InvalidField(e) => write!(f, "{e}"),
            PayloadError::Crypto(e) => write!(f, "crypto error: {e}"),
        }
    }
}

impl From<CryptoError> for PayloadError {
    fn from(e: CryptoError) -> Self {
        PayloadError::Crypto(e)
    }
}

impl From<InvalidValue> for PayloadError {
    fn from(e: InvalidValue) -> Self {
        PayloadError::InvalidField(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PayloadError {}
