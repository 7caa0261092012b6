//! Network parameter persistence.
//!
//! A device that loses power must come back with the same identity,
//! keys, and client table, so those are written out whenever they
//! change. The stored form is a postcard body prefixed with a one-byte
//! parameter CRC; a corrupted blob is detected rather than half-loaded.
//! The medium itself sits behind the [`Nvram`] trait so embedders can
//! back it with flash, EEPROM, or the filesystem. [`Storage`] is the
//! filesystem implementation, writing atomically (`.tmp` then rename).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use onenet_core::crc::{crc8, PARAM_CRC_INIT};
use onenet_core::features::Features;
use onenet_core::types::{Did, NetworkId};
use onenet_crypto::{KeyStore, XteaKey};

/// File name for the serialized network parameters.
const NETWORK_FILE: &str = "network_params";

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("stored parameters failed their checksum")]
    BadChecksum,

    #[error("failed to determine storage directory: {0}")]
    Directory(String),
}

/// One remembered peer, as a master remembers its clients or a client
/// remembers its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDevice {
    pub did: u16,
    pub features: [u8; 4],
    pub keep_alive_ms: u32,
    /// Whether this peer has confirmed the current key fragment.
    pub key_confirmed: bool,
}

impl StoredDevice {
    pub fn did(&self) -> Did {
        Did::new(self.did).unwrap_or(Did::BROADCAST)
    }

    pub fn features(&self) -> Features {
        Features::new(self.features)
    }
}

/// Everything a device must remember across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNetwork {
    pub nid: u64,
    pub did: u16,
    pub channel: u8,
    pub current_key: [u8; 16],
    pub old_key: [u8; 16],
    /// A master's client table; empty on clients.
    pub devices: Vec<StoredDevice>,
}

impl StoredNetwork {
    pub fn nid(&self) -> Option<NetworkId> {
        NetworkId::new(self.nid).ok()
    }

    pub fn did(&self) -> Option<Did> {
        Did::new(self.did).ok()
    }

    pub fn keys(&self) -> KeyStore {
        KeyStore::from_parts(XteaKey::new(self.current_key), XteaKey::new(self.old_key))
    }
}

/// Serialize network parameters: one CRC byte, then the postcard body.
pub fn encode_network(network: &StoredNetwork) -> Result<Vec<u8>, StorageError> {
    let body =
        postcard::to_allocvec(network).map_err(|e| StorageError::Serialize(e.to_string()))?;
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(crc8(&body, PARAM_CRC_INIT));
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Deserialize network parameters, verifying the leading CRC byte.
pub fn decode_network(bytes: &[u8]) -> Result<StoredNetwork, StorageError> {
    let Some((stored_crc, body)) = bytes.split_first() else {
        return Err(StorageError::BadChecksum);
    };
    if crc8(body, PARAM_CRC_INIT) != *stored_crc {
        return Err(StorageError::BadChecksum);
    }
    postcard::from_bytes(body).map_err(|e| StorageError::Deserialize(e.to_string()))
}

/// A non-volatile blob store, implemented by the embedder.
pub trait Nvram {
    fn write_blob(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing has been written yet.
    fn read_blob(&self) -> Result<Option<Vec<u8>>, StorageError>;

    fn erase(&mut self) -> Result<(), StorageError>;

    fn save_network(&mut self, network: &StoredNetwork) -> Result<(), StorageError> {
        self.write_blob(&encode_network(network)?)
    }

    fn load_network(&self) -> Result<Option<StoredNetwork>, StorageError> {
        match self.read_blob()? {
            Some(bytes) => decode_network(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Forget everything, as when a client is removed from its network.
    fn clear(&mut self) -> Result<(), StorageError> {
        self.erase()
    }
}

/// Filesystem-backed [`Nvram`].
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance, creating the directory if needed.
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create storage at the default path (`~/.onenet/state`).
    pub fn default_path() -> Result<Self, StorageError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StorageError::Directory("could not determine home directory".into()))?;
        Self::new(home.join(".onenet").join("state"))
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Nvram for Storage {
    fn write_blob(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.atomic_write(&self.base_dir.join(NETWORK_FILE), bytes)
    }

    fn read_blob(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.base_dir.join(NETWORK_FILE)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        match std::fs::remove_file(self.base_dir.join(NETWORK_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
