//! Error types for the role layer.

use onenet_core::error::PayloadError;
use onenet_core::types::Did;
use onenet_mac::{MacError, SessionError};

use crate::persist::StorageError;

/// Errors that can occur while operating a MASTER or CLIENT.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not joined to a network")]
    NotJoined,

    #[error("already joined to a network")]
    AlreadyJoined,

    #[error("no invite in progress")]
    NoInviteInProgress,

    #[error("an invite is already in progress")]
    InviteInProgress,

    #[error("invite timed out")]
    InviteTimedOut,

    #[error("network is full")]
    NetworkFull,

    #[error("unknown client: {0}")]
    UnknownClient(Did),

    #[error("invalid invite code: {0}")]
    InvalidInviteCode(String),

    #[error("mac error: {0}")]
    Mac(#[from] MacError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
