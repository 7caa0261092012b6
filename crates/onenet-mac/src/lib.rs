//! MAC layer of the ONE-NET stack.
//!
//! This crate owns everything between the wire formats and the role
//! layer: the per-peer message-ID/anti-replay bookkeeping, the
//! single-data transaction state machine, the ACK/NACK retry policy,
//! route discovery payloads, and the block/stream session state
//! machines.
//!
//! The state machines are sans-I/O. They consume received frames,
//! write-completion signals, and the current tick, and they produce
//! actions (frames to transmit, events for the role layer). Nothing in
//! here touches a radio.

pub mod device;
pub mod engine;
pub mod error;
pub mod policy;
pub mod route;
pub mod session;
pub mod txn;
pub mod wire;

pub use device::{DeviceTable, MsgIdDisposition, SendingDevice};
pub use engine::{Action, Engine, EngineConfig, Event, OutboundSingle};
pub use error::{MacError, SessionError};
pub use policy::ResponseAction;
pub use route::{append_hop, decode_route, encode_route, intermediaries, route_reaches};
pub use session::{
    ActiveSession, BlockReceiver, BlockTransfer, BsPhase, BsStep, ReceiverStep, StreamSender,
    TerminateStatus,
};
pub use txn::{SingleTxn, TxnStatus, MAX_RETRY};
