//! Role layer of the ONE-NET stack.
//!
//! This crate turns the MAC engine into a usable device: the MASTER
//! role that creates a network, invites clients, and runs key rotation
//! campaigns, and the CLIENT role that scans for an invite, joins, and
//! answers the master's admin traffic. It also carries the node's
//! ambient concerns: configuration files, structured logging, and
//! persistence of network parameters across restarts.
//!
//! Both roles are sans-I/O like the engine underneath them; the
//! application owns the radio and the clock and exchanges frames,
//! ticks, and outputs with the role object.

pub mod client;
pub mod config;
pub mod error;
pub mod invite;
pub mod logging;
pub mod master;
pub mod peer;
pub mod persist;

pub use client::{Client, ClientEvent, ClientOutput};
pub use config::{NodeConfig, Role};
pub use error::NodeError;
pub use invite::InviteCode;
pub use master::{Master, MasterEvent, MasterOutput};
pub use peer::{PeerAssignment, PeerTable};
pub use persist::{Nvram, Storage, StorageError, StoredDevice, StoredNetwork};
