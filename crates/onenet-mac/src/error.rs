//! MAC-layer error types.

use onenet_core::error::{CodecError, PacketError, PayloadError};
use onenet_core::types::Did;
use onenet_crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum MacError {
    #[error("not joined to a network")]
    NotJoined,

    #[error("transaction queue full")]
    QueueFull,

    #[error("device table full")]
    DeviceTableFull,

    #[error("unknown device: {0}")]
    UnknownDevice(Did),

    #[error("frame is not for this network")]
    WrongNetwork,

    #[error("frame is not addressed to this device")]
    NotAddressedHere,

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transfer size must be nonzero")]
    ZeroTransferSize,

    #[error("chunk size out of range: {0} (max 40)")]
    InvalidChunkSize(u8),

    #[error("a block or stream transfer is already in progress")]
    AlreadyInProgress,

    #[error("peer lacks a required capability: {0}")]
    NotCapable(&'static str),

    #[error("received data outside the transfer bounds")]
    OutOfBounds,

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
}
