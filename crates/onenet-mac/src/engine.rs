//! The single-data transaction engine.
//!
//! One engine instance drives one device's MAC behavior. It is
//! sans-I/O: callers feed it received frames, write-completion signals,
//! and the current tick in milliseconds, and it returns actions, either
//! frames to transmit or events for the role layer. The engine owns the
//! transmit queues, the per-peer message-ID windows, retries with
//! backoff, and the automatic responses (ACK/NACK for received singles,
//! key rotation on a new key fragment, route completion).
//!
//! Block and stream frames are decrypted and handed up as
//! [`Event::SessionFrame`]; the session state machines in
//! [`crate::session`] own that traffic.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use onenet_core::ack_nack::{AckNack, AckNackPayload, NackReason, ResponseHandle};
use onenet_core::admin::AdminMessage;
use onenet_core::error::PayloadError;
use onenet_core::features::Features;
use onenet_core::packet::{EncodedPacket, HopsField};
use onenet_core::payload::{MessageType, SinglePayload, DATA_IDX};
use onenet_core::pid::{PacketKind, Pid};
use onenet_core::types::{Did, MessageId, NetworkId, Priority};
use onenet_crypto::{KeyFragment, KeySlot, KeyStore};

use crate::device::{DeviceTable, MsgIdDisposition};
use crate::error::MacError;
use crate::policy::{disposition, ResponseAction};
use crate::route;
use crate::txn::{SingleTxn, TxnStatus};
use crate::wire;

/// Static parameters of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub did: Did,
    pub nid: NetworkId,
    pub features: Features,
    /// Reject out-of-window message IDs from new peers.
    pub strict_msg_id: bool,
    /// Base response deadline per attempt.
    pub response_timeout_ms: u64,
    /// Queued singles allowed per priority.
    pub max_queue: usize,
    /// Peers tracked at once.
    pub device_capacity: usize,
}

impl EngineConfig {
    pub fn new(did: Did, nid: NetworkId, features: Features) -> Self {
        Self {
            did,
            nid,
            features,
            strict_msg_id: true,
            response_timeout_ms: crate::txn::RESPONSE_TIMEOUT_MS,
            max_queue: 8,
            device_capacity: 16,
        }
    }
}

/// Where the engine is in its send cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Not yet started.
    Init,
    /// Scanning for an invite; only invite frames are meaningful.
    JoinNetwork,
    /// Idle on the channel, free to send or respond.
    Listen,
    /// A data frame has been handed to the radio.
    Writing,
    /// A data frame is out; waiting for its ACK or NACK.
    WaitingResponse,
}

/// One queued application or admin single.
#[derive(Debug, Clone)]
pub struct OutboundSingle {
    pub dst: Did,
    pub msg_type: MessageType,
    pub data: Vec<u8>,
    pub priority: Priority,
    pub hops: Option<HopsField>,
}

impl OutboundSingle {
    pub fn app(dst: Did, data: Vec<u8>) -> Self {
        Self {
            dst,
            msg_type: MessageType::App,
            data,
            priority: Priority::Low,
            hops: None,
        }
    }

    pub fn admin(dst: Did, message: &AdminMessage) -> Self {
        Self {
            dst,
            msg_type: MessageType::Admin,
            data: message.encode(),
            priority: Priority::High,
            hops: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_hops(mut self, hops: HopsField) -> Self {
        self.hops = Some(hops);
        self
    }
}

/// Something the caller must do on the engine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand this frame to the radio.
    Transmit(Vec<u8>),
    /// Deliver this event to the role layer.
    Event(Event),
}

/// Engine-to-role-layer notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A queued single was ACKed.
    SingleDelivered {
        dst: Did,
        msg_id: MessageId,
        response: AckNack,
    },
    /// A queued single failed for good.
    SingleFailed {
        dst: Did,
        msg_id: MessageId,
        status: TxnStatus,
        reason: Option<NackReason>,
    },
    /// An application single arrived and was ACKed.
    AppMessage { src: Did, data: Vec<u8> },
    /// An admin single arrived and was ACKed. Key fragments are
    /// handled internally and surface as [`Event::KeyRotated`] instead.
    AdminMessage { src: Did, message: AdminMessage },
    /// The network key was rotated in response to a new fragment.
    KeyRotated { fragment: KeyFragment },
    /// An invite-family frame; the role layer holds the invite key.
    InviteFrame(EncodedPacket),
    /// A decrypted block or stream frame for the session layer.
    SessionFrame { packet: EncodedPacket, raw: Vec<u8> },
}

/// Payload block count needed for `len` data bytes in a single.
fn blocks_for(len: usize) -> Result<u8, MacError> {
    for blocks in 1..=3u8 {
        if len <= usize::from(blocks) * 8 - DATA_IDX {
            return Ok(blocks);
        }
    }
    Err(MacError::Payload(PayloadError::DataTooLong {
        max: 24 - DATA_IDX,
        actual: len,
    }))
}

/// The MAC engine for one device.
pub struct Engine {
    config: EngineConfig,
    keys: KeyStore,
    devices: DeviceTable,
    state: State,
    high: VecDeque<OutboundSingle>,
    low: VecDeque<OutboundSingle>,
    current: Option<SingleTxn>,
}

impl Engine {
    pub fn new(config: EngineConfig, keys: KeyStore) -> Self {
        let devices = DeviceTable::new(config.device_capacity);
        Self {
            config,
            keys,
            devices,
            state: State::Init,
            high: VecDeque::new(),
            low: VecDeque::new(),
            current: None,
        }
    }

    /// Begin operating as an already-joined device.
    pub fn start(&mut self) {
        debug!(did = %self.config.did, nid = %self.config.nid, "engine started");
        self.state = State::Listen;
    }

    /// Begin scanning for an invite. Only invite frames are surfaced
    /// until [`Engine::network_joined`] is called.
    pub fn begin_join(&mut self) {
        debug!("scanning for invite");
        self.state = State::JoinNetwork;
    }

    /// Adopt the identity and key handed out by an invite.
    pub fn network_joined(&mut self, nid: NetworkId, did: Did, keys: KeyStore) {
        debug!(%did, %nid, "joined network");
        self.config.nid = nid;
        self.config.did = did;
        self.keys = keys;
        self.state = State::Listen;
    }

    pub fn did(&self) -> Did {
        self.config.did
    }

    pub fn nid(&self) -> NetworkId {
        self.config.nid
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    /// Rotate the network key from the role layer (masters push
    /// fragments; clients rotate via the admin path automatically).
    pub fn rotate_keys(&mut self, fragment: KeyFragment) {
        self.keys.rotate(fragment);
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Listen && self.current.is_none()
    }

    pub fn queue_depth(&self) -> usize {
        self.high.len() + self.low.len()
    }

    /// Queue a single for transmission. Fails when the engine has not
    /// joined a network or the priority queue is full.
    pub fn queue_single(&mut self, single: OutboundSingle) -> Result<(), MacError> {
        if matches!(self.state, State::Init | State::JoinNetwork) {
            return Err(MacError::NotJoined);
        }
        blocks_for(single.data.len())?;
        let queue = match single.priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        };
        if queue.len() >= self.config.max_queue {
            return Err(MacError::QueueFull);
        }
        trace!(dst = %single.dst, len = single.data.len(), "single queued");
        queue.push_back(single);
        Ok(())
    }

    /// Advance timers and start queued work. Call on every tick.
    pub fn poll(&mut self, now_ms: u64) -> Result<Vec<Action>, MacError> {
        match self.state {
            State::Listen => self.start_next_single(now_ms),
            State::WaitingResponse => self.check_response_deadline(now_ms),
            _ => Ok(Vec::new()),
        }
    }

    /// Signal that the radio finished writing the frame from the last
    /// [`Action::Transmit`] issued by [`Engine::poll`]. Response frames
    /// (ACKs the engine sends on its own) need no completion signal.
    pub fn on_write_complete(&mut self, now_ms: u64) {
        if self.state != State::Writing {
            return;
        }
        match self.current.as_mut() {
            Some(txn) => {
                txn.record_attempt(now_ms);
                self.state = State::WaitingResponse;
            }
            None => self.state = State::Listen,
        }
    }

    fn start_next_single(&mut self, _now_ms: u64) -> Result<Vec<Action>, MacError> {
        let Some(single) = self.high.pop_front().or_else(|| self.low.pop_front()) else {
            return Ok(Vec::new());
        };

        let strict = self.config.strict_msg_id;
        let device = match self.devices.get_or_insert(single.dst) {
            Ok(device) => device,
            Err(e) => {
                warn!(dst = %single.dst, "dropping single: {e}");
                return Err(e);
            }
        };
        device.reject_invalid_msg_id = strict;
        let msg_id = device.next_message_id();
        let slot = if device.use_old_key {
            KeySlot::Old
        } else {
            KeySlot::Current
        };

        let kind = match single.msg_type {
            MessageType::Route => PacketKind::RouteData,
            _ => PacketKind::SingleData,
        };
        let blocks = blocks_for(single.data.len())?;
        let more_queued = !self.high.is_empty() || !self.low.is_empty();
        let pid = Pid::with_blocks(kind, blocks)?
            .with_stay_awake(more_queued)
            .with_multi_hop(single.hops.is_some())
            .with_old_key(slot == KeySlot::Old);

        let raw = SinglePayload {
            msg_id,
            msg_type: single.msg_type,
            data: single.data,
        }
        .encode(blocks)?;

        let mut txn = SingleTxn::new(single.dst, single.priority, msg_id, pid, raw, single.hops);
        txn.set_response_timeout(self.config.response_timeout_ms);
        let frame = self.seal_txn_frame(&txn)?;

        debug!(dst = %txn.dst, %msg_id, pid = %pid, "single transmit");
        self.current = Some(txn);
        self.state = State::Writing;
        Ok(vec![Action::Transmit(frame)])
    }

    fn check_response_deadline(&mut self, now_ms: u64) -> Result<Vec<Action>, MacError> {
        let Some(txn) = self.current.as_ref() else {
            self.state = State::Listen;
            return Ok(Vec::new());
        };
        if !txn.response_overdue(now_ms) {
            return Ok(Vec::new());
        }
        if txn.retries_exhausted() {
            let txn = self
                .current
                .take()
                .unwrap_or_else(|| unreachable!("checked above"));
            warn!(dst = %txn.dst, attempts = txn.attempts, "single timed out");
            self.state = State::Listen;
            return Ok(vec![Action::Event(Event::SingleFailed {
                dst: txn.dst,
                msg_id: txn.msg_id,
                status: TxnStatus::TimedOut,
                reason: Some(NackReason::NO_RESPONSE_AFTER_RETRIES),
            })]);
        }
        self.retransmit_current()
    }

    fn retransmit_current(&mut self) -> Result<Vec<Action>, MacError> {
        let Some(txn) = self.current.as_ref() else {
            self.state = State::Listen;
            return Ok(Vec::new());
        };
        trace!(dst = %txn.dst, attempt = txn.attempts, "retransmitting single");
        let frame = self.seal_txn_frame(txn)?;
        self.state = State::Writing;
        Ok(vec![Action::Transmit(frame)])
    }

    fn seal_txn_frame(&self, txn: &SingleTxn) -> Result<Vec<u8>, MacError> {
        let slot = if txn.pid.old_key() {
            KeySlot::Old
        } else {
            KeySlot::Current
        };
        wire::seal_frame_with_slot(
            txn.dst,
            self.config.nid,
            self.config.did,
            txn.pid,
            &txn.raw_payload,
            &self.keys,
            slot,
            txn.hops,
        )
    }

    /// Process one received frame. `now_ms` drives retry pacing when
    /// the frame resolves an in-flight transaction.
    pub fn handle_frame(&mut self, bytes: &[u8], now_ms: u64) -> Result<Vec<Action>, MacError> {
        let packet = EncodedPacket::parse(bytes)?;
        let kind = packet.pid.kind();

        if kind.is_invite() {
            if self.state == State::Init {
                return Ok(Vec::new());
            }
            return Ok(vec![Action::Event(Event::InviteFrame(packet))]);
        }
        if matches!(self.state, State::Init | State::JoinNetwork) {
            trace!(pid = %packet.pid, "ignoring frame before join");
            return Ok(Vec::new());
        }
        if packet.nid != self.config.nid {
            return Err(MacError::WrongNetwork);
        }
        if packet.dst != self.config.did && !packet.dst.is_broadcast() {
            return Err(MacError::NotAddressedHere);
        }

        if kind.is_block() || kind.is_stream() {
            let (raw, _) = wire::open_frame(&packet, &self.keys)?;
            return Ok(vec![Action::Event(Event::SessionFrame { packet, raw })]);
        }

        match kind {
            PacketKind::SingleAck | PacketKind::SingleNack | PacketKind::RouteAck
            | PacketKind::RouteNack => self.handle_response(&packet, now_ms),
            PacketKind::SingleData | PacketKind::RouteData => self.handle_data(&packet),
            _ => Ok(Vec::new()),
        }
    }

    fn handle_response(
        &mut self,
        packet: &EncodedPacket,
        now_ms: u64,
    ) -> Result<Vec<Action>, MacError> {
        if self.state != State::WaitingResponse {
            trace!(src = %packet.src, "response with no transaction in flight");
            return Ok(Vec::new());
        }
        let Some(txn) = self.current.as_ref() else {
            self.state = State::Listen;
            return Ok(Vec::new());
        };
        if packet.src != txn.dst {
            trace!(src = %packet.src, expected = %txn.dst, "response from wrong peer");
            return Ok(Vec::new());
        }

        let (raw, _) = wire::open_frame(packet, &self.keys)?;
        let (msg_id, response) = AckNack::parse(&raw, packet.pid.kind().is_nack())?;
        if msg_id != txn.msg_id {
            trace!(%msg_id, expected = %txn.msg_id, "response for stale message id");
            return Ok(Vec::new());
        }

        match disposition(&response, txn.attempts) {
            ResponseAction::Complete => {
                let txn = self
                    .current
                    .take()
                    .unwrap_or_else(|| unreachable!("checked above"));
                debug!(dst = %txn.dst, %msg_id, "single delivered");
                self.state = State::Listen;
                Ok(vec![Action::Event(Event::SingleDelivered {
                    dst: txn.dst,
                    msg_id,
                    response,
                })])
            }
            ResponseAction::Abort(reason) => {
                let txn = self
                    .current
                    .take()
                    .unwrap_or_else(|| unreachable!("checked above"));
                warn!(dst = %txn.dst, %reason, "single aborted");
                self.state = State::Listen;
                Ok(vec![Action::Event(Event::SingleFailed {
                    dst: txn.dst,
                    msg_id,
                    status: TxnStatus::SingleFail,
                    reason: Some(reason),
                })])
            }
            ResponseAction::Retry {
                new_timeout_ms,
                pause_ms,
            } => {
                let txn = self
                    .current
                    .as_mut()
                    .unwrap_or_else(|| unreachable!("checked above"));
                if let Some(timeout) = new_timeout_ms {
                    txn.set_response_timeout(timeout);
                }
                if let Some(pause) = pause_ms {
                    // Push the deadline out; the poll loop retransmits
                    // once the pause elapses.
                    txn.response_deadline = now_ms + pause;
                    self.state = State::WaitingResponse;
                    return Ok(Vec::new());
                }
                self.retransmit_current()
            }
        }
    }

    fn handle_data(&mut self, packet: &EncodedPacket) -> Result<Vec<Action>, MacError> {
        if self.state != State::Listen {
            // Busy with our own transaction; ask the peer to try later.
            let nack = AckNack::nack(NackReason::BUSY_TRY_AGAIN);
            let (raw, slot) = wire::open_frame(packet, &self.keys)?;
            let (msg_id, _) = onenet_core::payload::check(&raw)?;
            let frame = self.seal_response(packet, msg_id, &nack, slot)?;
            return Ok(vec![Action::Transmit(frame)]);
        }

        let (raw, slot) = wire::open_frame(packet, &self.keys)?;
        let single = SinglePayload::parse(&raw)?;
        let msg_id = single.msg_id;
        let src = packet.src;

        let strict = self.config.strict_msg_id;
        let device = self.devices.get_or_insert(src)?;
        device.reject_invalid_msg_id = strict;
        match device.validate_message_id(msg_id) {
            MsgIdDisposition::Rejected => {
                debug!(%src, %msg_id, "rejecting out-of-window message id");
                let nack = AckNack::nack(NackReason::INVALID_MSG_ID);
                let frame = self.seal_response(packet, msg_id, &nack, slot)?;
                Ok(vec![Action::Transmit(frame)])
            }
            MsgIdDisposition::Retransmission => {
                // Re-ACK without reprocessing; the peer missed our ACK.
                trace!(%src, %msg_id, "re-acking retransmission");
                let frame = self.seal_response(packet, msg_id, &AckNack::ack(), slot)?;
                Ok(vec![Action::Transmit(frame)])
            }
            MsgIdDisposition::NewMessage => self.accept_data(packet, &single, slot),
        }
    }

    fn accept_data(
        &mut self,
        packet: &EncodedPacket,
        single: &SinglePayload,
        slot: KeySlot,
    ) -> Result<Vec<Action>, MacError> {
        let src = packet.src;
        let msg_id = single.msg_id;

        if packet.pid.kind() == PacketKind::RouteData {
            // Complete the route by appending ourselves and ACK with
            // the updated list so the originator learns the path.
            let mut hops = route::decode_route(&single.data)?;
            route::append_hop(&mut hops, self.config.did);
            let capacity = usize::from(packet.pid.blocks()) * 8 - DATA_IDX;
            let encoded = route::encode_route(&hops, capacity)?;
            let ack = AckNack::ack_with(ResponseHandle::Route, AckNackPayload::Route(encoded));
            let frame = self.seal_response(packet, msg_id, &ack, slot)?;
            return Ok(vec![Action::Transmit(frame)]);
        }

        match single.msg_type {
            MessageType::Admin => {
                let message = AdminMessage::parse(&single.data)?;
                if let AdminMessage::NewKeyFragment { fragment } = message {
                    // Rotate immediately and confirm in the ACK, so the
                    // master sees the fragment land in one exchange. The
                    // ACK goes out under the key the request arrived
                    // under, which rotation just moved to the old slot.
                    self.keys.rotate(fragment);
                    debug!(%src, "network key rotated");
                    let ack = AckNack::ack_with(
                        ResponseHandle::KeyFragment,
                        AckNackPayload::KeyFragment(fragment),
                    );
                    let frame = self.seal_response(packet, msg_id, &ack, KeySlot::Old)?;
                    return Ok(vec![
                        Action::Transmit(frame),
                        Action::Event(Event::KeyRotated { fragment }),
                    ]);
                }
                let frame = self.seal_response(packet, msg_id, &AckNack::ack(), slot)?;
                Ok(vec![
                    Action::Transmit(frame),
                    Action::Event(Event::AdminMessage { src, message }),
                ])
            }
            MessageType::App | MessageType::AppWithSrcUnit => {
                let frame = self.seal_response(packet, msg_id, &AckNack::ack(), slot)?;
                Ok(vec![
                    Action::Transmit(frame),
                    Action::Event(Event::AppMessage {
                        src,
                        data: single.data.clone(),
                    }),
                ])
            }
            MessageType::Route => {
                // Route payloads ride the route PID, not a single PID.
                let nack = AckNack::nack(NackReason::BAD_DATA);
                let frame = self.seal_response(packet, msg_id, &nack, slot)?;
                Ok(vec![Action::Transmit(frame)])
            }
        }
    }

    /// Seal an ACK or NACK answering `packet`, echoing its message ID
    /// and the key slot that opened it. Stay-awake is set when we have
    /// queued traffic for the peer to stay up for.
    fn seal_response(
        &self,
        packet: &EncodedPacket,
        msg_id: MessageId,
        response: &AckNack,
        slot: KeySlot,
    ) -> Result<Vec<u8>, MacError> {
        let pid = packet
            .pid
            .to_response(response.is_ack())?
            .with_stay_awake(self.queue_depth() > 0)
            .with_multi_hop(false);
        let raw = response.encode(msg_id, pid.blocks())?;
        wire::seal_frame_with_slot(
            packet.src,
            self.config.nid,
            self.config.did,
            pid,
            &raw,
            &self.keys,
            slot,
            None,
        )
    }
}
