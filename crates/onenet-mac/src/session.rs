//! Block and stream session state machines.
//!
//! A block transfer moves a known number of bytes in chunks of up to 40
//! data packets; a stream pushes packets for as long as the application
//! keeps producing them. Both are negotiated over admin singles before
//! any data moves and torn down with a terminate exchange afterward.
//!
//! Like the engine, these machines are sans-I/O. The role layer asks
//! [`BlockTransfer::next_step`] what to do, queues the resulting admin
//! or data traffic through the engine, and feeds delivery results back
//! in. The machines only track position, chunk bookkeeping, and the
//! negotiation phase.

use tracing::{debug, trace, warn};

use onenet_core::ack_nack::{ChunkMask, NackReason};
use onenet_core::admin::{AdminMessage, BlockStreamRequest};
use onenet_core::features::Features;
use onenet_core::payload::{BlockPayload, StreamPayload, BS_DATA_LEN};
use onenet_core::types::{Did, MessageId, Priority};

use crate::error::SessionError;
use crate::route;
use crate::txn::MAX_RETRY;

/// Default per-chunk response deadline.
pub const DEFAULT_BS_TIMEOUT_MS: u16 = 3_000;

/// How often a stream sender asks for an ACK.
pub const STREAM_RESPONSE_INTERVAL_MS: u64 = 5_000;

/// Transfers at or below this many bytes skip route discovery and
/// data-rate negotiation.
pub const SHORT_TRANSFER_MAX: usize = 2_000;

/// Delay between data packets for a high-priority session.
pub const HIGH_PRIORITY_FRAG_DELAY_MS: u16 = 25;

/// Delay between data packets for a low-priority session.
pub const LOW_PRIORITY_FRAG_DELAY_MS: u16 = 50;

/// Pause between chunks.
pub const CHUNK_PAUSE_MS: u16 = 25;

/// Largest chunk size in packets.
pub const MAX_CHUNK_SIZE: u8 = 40;

/// How a session ended, carried in the terminate admin message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminateStatus {
    Complete = 0x00,
    Canceled = 0x01,
    Failed = 0x02,
}

impl TerminateStatus {
    pub fn from_raw(raw: u8) -> TerminateStatus {
        match raw {
            0x00 => TerminateStatus::Complete,
            0x01 => TerminateStatus::Canceled,
            _ => TerminateStatus::Failed,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// Where a block transfer is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsPhase {
    /// Send a route single to learn the path to the peer.
    FindRoute,
    /// Waiting for the route ACK.
    ConfirmRoute,
    /// Ask the peer for permission via a block request admin.
    DevicePermission,
    /// Ask the first repeater on the route for permission.
    RepeaterPermission,
    /// Move both ends to the negotiated data rate and channel.
    ChangeDataRateChannel,
    /// Negotiation done; about to send the first chunk.
    Commence,
    /// Sending the current chunk's data packets.
    SendChunk,
    /// All packets of the chunk are out; waiting for the chunk ACK.
    WaitChunkResponse,
    /// Between chunks.
    ChunkPause,
    /// Data delivered; terminate exchange in flight.
    Terminate,
    /// Done, successfully or not.
    Complete,
}

/// What the role layer should do next for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BsStep {
    /// Queue these bytes as a route single toward the peer.
    SendRoute(Vec<u8>),
    /// Queue this admin single toward `dst` (usually the peer, but
    /// repeater permission goes to the repeater itself).
    SendAdmin { dst: Did, message: AdminMessage },
    /// Seal and transmit this block-data payload, then wait
    /// `frag_delay_ms` before asking again.
    SendData(BlockPayload),
    /// Nothing to do until the clock advances or a response arrives.
    Idle,
    /// The session is over.
    Done(TerminateStatus),
}

/// Sender side of a block transfer.
#[derive(Debug)]
pub struct BlockTransfer {
    src: Did,
    dst: Did,
    data: Vec<u8>,
    priority: Priority,
    chunk_size: u8,
    frag_delay_ms: u16,
    chunk_pause_ms: u16,
    timeout_ms: u16,
    channel: u8,
    data_rate: u8,
    phase: BsPhase,
    /// Set while an admin or route single is in flight.
    awaiting_response: bool,
    route: Vec<Did>,
    /// Byte offset where the current chunk starts.
    chunk_base: usize,
    /// Packets of the current chunk the peer has confirmed.
    acked: ChunkMask,
    /// Next packet index to (re)send within the current chunk.
    next_pkt: u8,
    chunk_retries: u8,
    /// Tick before which [`BsStep::Idle`] is the only answer.
    wake_at: u64,
    /// Chunk response deadline.
    response_deadline: u64,
    status: TerminateStatus,
}

impl BlockTransfer {
    /// Start a transfer of `data` toward `dst`. Validates the transfer
    /// parameters and the peer's capabilities up front.
    pub fn new(
        src: Did,
        dst: Did,
        data: Vec<u8>,
        priority: Priority,
        chunk_size: u8,
        peer: &Features,
    ) -> Result<Self, SessionError> {
        if data.is_empty() {
            return Err(SessionError::ZeroTransferSize);
        }
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(SessionError::InvalidChunkSize(chunk_size));
        }
        if !peer.block_capable() {
            return Err(SessionError::NotCapable("block"));
        }

        // Short transfers are not worth a route or data-rate dance.
        let phase = if data.len() <= SHORT_TRANSFER_MAX {
            BsPhase::DevicePermission
        } else {
            BsPhase::FindRoute
        };
        let frag_delay_ms = match priority {
            Priority::High => HIGH_PRIORITY_FRAG_DELAY_MS,
            Priority::Low => LOW_PRIORITY_FRAG_DELAY_MS,
        };
        debug!(%dst, len = data.len(), chunk_size, "block transfer created");
        Ok(Self {
            src,
            dst,
            data,
            priority,
            chunk_size,
            frag_delay_ms,
            chunk_pause_ms: CHUNK_PAUSE_MS,
            timeout_ms: DEFAULT_BS_TIMEOUT_MS,
            channel: 0,
            data_rate: Features::BASE_DATA_RATE,
            phase,
            awaiting_response: false,
            route: Vec::new(),
            chunk_base: 0,
            acked: ChunkMask::empty(),
            next_pkt: 0,
            chunk_retries: 0,
            wake_at: 0,
            response_deadline: 0,
            status: TerminateStatus::Complete,
        })
    }

    pub fn with_channel_and_rate(mut self, channel: u8, data_rate: u8) -> Self {
        self.channel = channel;
        self.data_rate = data_rate;
        self
    }

    pub fn dst(&self) -> Did {
        self.dst
    }

    pub fn phase(&self) -> BsPhase {
        self.phase
    }

    pub fn frag_delay_ms(&self) -> u16 {
        self.frag_delay_ms
    }

    pub fn in_progress(&self) -> bool {
        self.phase != BsPhase::Complete
    }

    /// Bytes the peer has confirmed so far.
    pub fn bytes_confirmed(&self) -> usize {
        self.chunk_base
    }

    fn request(&self) -> BlockStreamRequest {
        BlockStreamRequest {
            transfer_size: self.data.len() as u32,
            chunk_size: self.chunk_size,
            frag_delay_ms: self.frag_delay_ms,
            chunk_pause_ms: self.chunk_pause_ms,
            channel: self.channel,
            data_rate: self.data_rate,
            timeout_ms: self.timeout_ms,
            dst: self.dst,
            priority: self.priority,
        }
    }

    /// Packets in the current chunk.
    fn chunk_packets(&self) -> u8 {
        let remaining = self.data.len() - self.chunk_base;
        let full = remaining.div_ceil(BS_DATA_LEN);
        full.min(usize::from(self.chunk_size)) as u8
    }

    fn packet_at(&self, idx: u8) -> BlockPayload {
        let offset = self.chunk_base + usize::from(idx) * BS_DATA_LEN;
        let end = (offset + BS_DATA_LEN).min(self.data.len());
        BlockPayload {
            // Block payload IDs are per-session; the receiver keys on
            // chunk and byte position, not the rolling window.
            msg_id: MessageId::ZERO,
            chunk_idx: idx,
            byte_idx: offset as u32,
            data: self.data[offset..end].to_vec(),
        }
    }

    /// What to do now. Advances the phase as steps are handed out, so
    /// call it again after acting on the result.
    pub fn next_step(&mut self, now_ms: u64) -> BsStep {
        if self.awaiting_response || now_ms < self.wake_at {
            if self.phase == BsPhase::Complete {
                return BsStep::Done(self.status);
            }
            return BsStep::Idle;
        }
        match self.phase {
            BsPhase::FindRoute => {
                self.phase = BsPhase::ConfirmRoute;
                self.awaiting_response = true;
                // Payload capacity of a 2-block route single.
                match route::encode_route(&[self.src], 13) {
                    Ok(bytes) => BsStep::SendRoute(bytes),
                    Err(e) => {
                        warn!("route encode failed: {e}");
                        self.fail()
                    }
                }
            }
            BsPhase::ConfirmRoute => BsStep::Idle,
            BsPhase::DevicePermission => {
                self.awaiting_response = true;
                BsStep::SendAdmin {
                    dst: self.dst,
                    message: AdminMessage::RequestBlock(self.request()),
                }
            }
            BsPhase::RepeaterPermission => {
                let repeaters = route::intermediaries(&self.route, self.src, self.dst);
                match repeaters.first() {
                    Some(&repeater) => {
                        self.awaiting_response = true;
                        BsStep::SendAdmin {
                            dst: repeater,
                            message: AdminMessage::RequestRepeater {
                                src: self.src,
                                dst: self.dst,
                                data_rate: self.data_rate,
                                channel: self.channel,
                                duration_ms: self.timeout_ms,
                            },
                        }
                    }
                    None => {
                        self.phase = BsPhase::ChangeDataRateChannel;
                        self.next_step(now_ms)
                    }
                }
            }
            BsPhase::ChangeDataRateChannel => {
                self.awaiting_response = true;
                BsStep::SendAdmin {
                    dst: self.dst,
                    message: AdminMessage::ChangeDataRateChannel {
                        data_rate: self.data_rate,
                        channel: self.channel,
                        pause_ms: self.chunk_pause_ms,
                        dwell_ms: self.timeout_ms,
                    },
                }
            }
            BsPhase::Commence => {
                self.phase = BsPhase::SendChunk;
                self.next_pkt = 0;
                self.acked = ChunkMask::empty();
                self.next_step(now_ms)
            }
            BsPhase::SendChunk => {
                let count = self.chunk_packets();
                while self.next_pkt < count && self.acked.is_set(self.next_pkt) {
                    self.next_pkt += 1;
                }
                if self.next_pkt >= count {
                    self.phase = BsPhase::WaitChunkResponse;
                    self.response_deadline = now_ms + u64::from(self.timeout_ms);
                    return BsStep::Idle;
                }
                let payload = self.packet_at(self.next_pkt);
                trace!(chunk_idx = self.next_pkt, byte_idx = payload.byte_idx, "block data out");
                self.next_pkt += 1;
                self.wake_at = now_ms + u64::from(self.frag_delay_ms);
                BsStep::SendData(payload)
            }
            BsPhase::WaitChunkResponse => {
                if now_ms < self.response_deadline {
                    return BsStep::Idle;
                }
                // No chunk ACK in time; resend what is still missing.
                self.chunk_retries += 1;
                if self.chunk_retries > MAX_RETRY {
                    warn!(dst = %self.dst, "chunk response never arrived");
                    return self.fail();
                }
                self.phase = BsPhase::SendChunk;
                self.next_pkt = 0;
                self.next_step(now_ms)
            }
            BsPhase::ChunkPause => {
                self.phase = BsPhase::Commence;
                self.next_step(now_ms)
            }
            BsPhase::Terminate => {
                self.awaiting_response = true;
                BsStep::SendAdmin {
                    dst: self.dst,
                    message: AdminMessage::TerminateBlockStream {
                        status: self.status.raw(),
                    },
                }
            }
            BsPhase::Complete => BsStep::Done(self.status),
        }
    }

    /// The route single was ACKed with the completed hop list.
    pub fn on_route_response(&mut self, hops: Vec<Did>) {
        if self.phase != BsPhase::ConfirmRoute {
            return;
        }
        self.awaiting_response = false;
        trace!(hops = hops.len(), "route confirmed");
        self.route = hops;
        self.phase = BsPhase::DevicePermission;
    }

    /// The pending admin single was ACKed.
    pub fn on_admin_delivered(&mut self) {
        self.awaiting_response = false;
        self.phase = match self.phase {
            BsPhase::DevicePermission => {
                if route::intermediaries(&self.route, self.src, self.dst).is_empty() {
                    if self.data.len() <= SHORT_TRANSFER_MAX {
                        BsPhase::Commence
                    } else {
                        BsPhase::ChangeDataRateChannel
                    }
                } else {
                    BsPhase::RepeaterPermission
                }
            }
            BsPhase::RepeaterPermission => BsPhase::ChangeDataRateChannel,
            BsPhase::ChangeDataRateChannel => BsPhase::Commence,
            BsPhase::Terminate => BsPhase::Complete,
            other => other,
        };
    }

    /// The pending admin or route single failed.
    pub fn on_negotiation_failed(&mut self, reason: Option<NackReason>) {
        warn!(dst = %self.dst, ?reason, "session negotiation failed");
        self.awaiting_response = false;
        self.fail();
    }

    /// A chunk ACK arrived carrying the peer's received-packet mask.
    pub fn on_chunk_response(&mut self, mask: ChunkMask, now_ms: u64) {
        if !matches!(self.phase, BsPhase::SendChunk | BsPhase::WaitChunkResponse) {
            return;
        }
        self.acked = mask;
        let count = self.chunk_packets();
        if !mask.is_complete(count) {
            trace!(missing = mask.missing(count).len(), "chunk incomplete, resending");
            self.phase = BsPhase::SendChunk;
            self.next_pkt = 0;
            return;
        }

        self.chunk_retries = 0;
        self.chunk_base += usize::from(count) * BS_DATA_LEN;
        if self.chunk_base >= self.data.len() {
            debug!(dst = %self.dst, bytes = self.data.len(), "block transfer delivered");
            self.chunk_base = self.data.len();
            self.status = TerminateStatus::Complete;
            self.phase = BsPhase::Terminate;
        } else {
            self.phase = BsPhase::ChunkPause;
            self.wake_at = now_ms + u64::from(self.chunk_pause_ms);
        }
    }

    /// Abort from the application side.
    pub fn cancel(&mut self) {
        if self.phase != BsPhase::Complete {
            self.status = TerminateStatus::Canceled;
            self.awaiting_response = false;
            self.phase = BsPhase::Terminate;
        }
    }

    fn fail(&mut self) -> BsStep {
        self.status = TerminateStatus::Failed;
        self.phase = BsPhase::Complete;
        BsStep::Done(self.status)
    }
}

/// What a block receiver wants done after a data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverStep {
    /// Keep listening.
    Continue,
    /// ACK the chunk with this received-packet mask.
    AckChunk(ChunkMask),
    /// Everything arrived; here is the reassembled transfer.
    Complete(Vec<u8>),
}

/// Receiver side of a block transfer.
#[derive(Debug)]
pub struct BlockReceiver {
    transfer_size: usize,
    chunk_size: u8,
    data: Vec<u8>,
    chunk_base: usize,
    mask: ChunkMask,
}

impl BlockReceiver {
    /// Accept a transfer described by a block request admin.
    pub fn new(request: &BlockStreamRequest) -> Result<Self, SessionError> {
        if request.transfer_size == 0 {
            return Err(SessionError::ZeroTransferSize);
        }
        if request.chunk_size == 0 || request.chunk_size > MAX_CHUNK_SIZE {
            return Err(SessionError::InvalidChunkSize(request.chunk_size));
        }
        let transfer_size = request.transfer_size as usize;
        Ok(Self {
            transfer_size,
            chunk_size: request.chunk_size,
            data: vec![0u8; transfer_size],
            chunk_base: 0,
            mask: ChunkMask::empty(),
        })
    }

    pub fn bytes_expected(&self) -> usize {
        self.transfer_size
    }

    fn chunk_packets(&self) -> u8 {
        let remaining = self.transfer_size - self.chunk_base;
        let full = remaining.div_ceil(BS_DATA_LEN);
        full.min(usize::from(self.chunk_size)) as u8
    }

    /// Fold one data packet into the transfer.
    pub fn on_data(&mut self, payload: &BlockPayload) -> Result<ReceiverStep, SessionError> {
        let offset = payload.byte_idx as usize;
        let expected = self.chunk_base + usize::from(payload.chunk_idx) * BS_DATA_LEN;
        if offset != expected || offset >= self.transfer_size {
            return Err(SessionError::OutOfBounds);
        }
        let len = (self.transfer_size - offset).min(payload.data.len().min(BS_DATA_LEN));
        self.data[offset..offset + len].copy_from_slice(&payload.data[..len]);
        self.mask.set(payload.chunk_idx);

        let count = self.chunk_packets();
        if !self.mask.is_complete(count) {
            // Ask for retransmits once the sender finishes the chunk.
            if payload.chunk_idx + 1 == count {
                return Ok(ReceiverStep::AckChunk(self.mask));
            }
            return Ok(ReceiverStep::Continue);
        }

        let mask = self.mask;
        self.chunk_base += usize::from(count) * BS_DATA_LEN;
        self.mask = ChunkMask::empty();
        if self.chunk_base >= self.transfer_size {
            debug!(bytes = self.transfer_size, "block transfer reassembled");
            return Ok(ReceiverStep::Complete(core::mem::take(&mut self.data)));
        }
        Ok(ReceiverStep::AckChunk(mask))
    }
}

/// Sender side of a stream session.
///
/// Streams have no length; the sender emits packets as the application
/// produces data and stamps each with the time elapsed since the
/// stream opened. Every [`STREAM_RESPONSE_INTERVAL_MS`] it marks a
/// packet response-needed to confirm the peer is still there.
#[derive(Debug)]
pub struct StreamSender {
    dst: Did,
    started_at: u64,
    last_response_request: u64,
    awaiting_response: bool,
    done: bool,
}

impl StreamSender {
    pub fn new(dst: Did, peer: &Features, now_ms: u64) -> Result<Self, SessionError> {
        if !peer.stream_capable() {
            return Err(SessionError::NotCapable("stream"));
        }
        debug!(%dst, "stream opened");
        Ok(Self {
            dst,
            started_at: now_ms,
            last_response_request: now_ms,
            awaiting_response: false,
            done: false,
        })
    }

    pub fn dst(&self) -> Did {
        self.dst
    }

    pub fn in_progress(&self) -> bool {
        !self.done
    }

    /// Build the next stream packet around `data`.
    pub fn next_packet(&mut self, data: Vec<u8>, now_ms: u64) -> Result<StreamPayload, SessionError> {
        if data.len() > BS_DATA_LEN {
            return Err(SessionError::Payload(
                onenet_core::error::PayloadError::DataTooLong {
                    max: BS_DATA_LEN,
                    actual: data.len(),
                },
            ));
        }
        let response_needed = !self.awaiting_response
            && now_ms >= self.last_response_request + STREAM_RESPONSE_INTERVAL_MS;
        if response_needed {
            self.awaiting_response = true;
            self.last_response_request = now_ms;
        }
        Ok(StreamPayload {
            msg_id: MessageId::ZERO,
            response_needed,
            elapsed_ms: (now_ms - self.started_at).min(0xFF_FFFF) as u32,
            data,
        })
    }

    /// The peer ACKed a response-needed packet.
    pub fn on_ack(&mut self) {
        self.awaiting_response = false;
    }

    /// True when a requested response never came back and the stream
    /// should be torn down.
    pub fn peer_silent(&self, now_ms: u64) -> bool {
        self.awaiting_response
            && now_ms >= self.last_response_request + STREAM_RESPONSE_INTERVAL_MS
    }

    /// Close the stream; send the returned admin to the peer.
    pub fn terminate(&mut self, status: TerminateStatus) -> AdminMessage {
        debug!(dst = %self.dst, ?status, "stream terminated");
        self.done = true;
        AdminMessage::TerminateBlockStream {
            status: status.raw(),
        }
    }
}

/// Owner slot for the one block or stream session a device may run at
/// a time.
#[derive(Debug, Default)]
pub enum ActiveSession {
    #[default]
    Idle,
    Sending(BlockTransfer),
    Receiving(BlockReceiver),
    Streaming(StreamSender),
}

impl ActiveSession {
    pub fn is_idle(&self) -> bool {
        matches!(self, ActiveSession::Idle)
    }

    pub fn start_block(&mut self, transfer: BlockTransfer) -> Result<&mut BlockTransfer, SessionError> {
        if !self.is_idle() {
            return Err(SessionError::AlreadyInProgress);
        }
        *self = ActiveSession::Sending(transfer);
        match self {
            ActiveSession::Sending(transfer) => Ok(transfer),
            _ => unreachable!("just assigned"),
        }
    }

    pub fn start_receive(&mut self, receiver: BlockReceiver) -> Result<&mut BlockReceiver, SessionError> {
        if !self.is_idle() {
            return Err(SessionError::AlreadyInProgress);
        }
        *self = ActiveSession::Receiving(receiver);
        match self {
            ActiveSession::Receiving(receiver) => Ok(receiver),
            _ => unreachable!("just assigned"),
        }
    }

    pub fn start_stream(&mut self, stream: StreamSender) -> Result<&mut StreamSender, SessionError> {
        if !self.is_idle() {
            return Err(SessionError::AlreadyInProgress);
        }
        *self = ActiveSession::Streaming(stream);
        match self {
            ActiveSession::Streaming(stream) => Ok(stream),
            _ => unreachable!("just assigned"),
        }
    }

    /// Release the slot when a session terminates.
    pub fn finish(&mut self) {
        *self = ActiveSession::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_peer() -> Features {
        Features::simple_client().with_block(true).with_stream(true)
    }

    fn transfer(len: usize, chunk_size: u8) -> BlockTransfer {
        BlockTransfer::new(
            Did::new(1).unwrap(),
            Did::new(2).unwrap(),
            vec![0xAB; len],
            Priority::High,
            chunk_size,
            &block_peer(),
        )
        .unwrap()
    }

    #[test]
    fn empty_transfer_is_rejected() {
        let err = BlockTransfer::new(
            Did::new(1).unwrap(),
            Did::new(2).unwrap(),
            Vec::new(),
            Priority::High,
            MAX_CHUNK_SIZE,
            &block_peer(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::ZeroTransferSize));
    }

    #[test]
    fn chunk_size_bounds_are_enforced() {
        for bad in [0u8, 41, 255] {
            let err = BlockTransfer::new(
                Did::new(1).unwrap(),
                Did::new(2).unwrap(),
                vec![1],
                Priority::High,
                bad,
                &block_peer(),
            )
            .unwrap_err();
            assert!(matches!(err, SessionError::InvalidChunkSize(b) if b == bad));
        }
    }

    #[test]
    fn incapable_peer_is_rejected() {
        let err = BlockTransfer::new(
            Did::new(1).unwrap(),
            Did::new(2).unwrap(),
            vec![1],
            Priority::High,
            MAX_CHUNK_SIZE,
            &Features::simple_client(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::NotCapable("block")));
    }

    #[test]
    fn short_transfer_skips_route_and_rate_negotiation() {
        let mut xfer = transfer(100, MAX_CHUNK_SIZE);
        assert_eq!(xfer.phase(), BsPhase::DevicePermission);

        // Permission request first.
        match xfer.next_step(0) {
            BsStep::SendAdmin {
                dst,
                message: AdminMessage::RequestBlock(req),
            } => {
                assert_eq!(dst.raw(), 2);
                assert_eq!(req.transfer_size, 100);
                assert_eq!(req.chunk_size, MAX_CHUNK_SIZE);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        // Waiting for the permission ACK.
        assert_eq!(xfer.next_step(1), BsStep::Idle);
        xfer.on_admin_delivered();
        // Straight to data, no rate change for a short transfer.
        assert!(matches!(xfer.next_step(2), BsStep::SendData(_)));
        assert_eq!(xfer.phase(), BsPhase::SendChunk);
    }

    #[test]
    fn long_transfer_negotiates_route_first() {
        let mut xfer = transfer(SHORT_TRANSFER_MAX + 1, MAX_CHUNK_SIZE);
        assert_eq!(xfer.phase(), BsPhase::FindRoute);
        assert!(matches!(xfer.next_step(0), BsStep::SendRoute(_)));
        assert_eq!(xfer.next_step(1), BsStep::Idle);

        // Direct route: src then dst, no repeater.
        xfer.on_route_response(vec![Did::new(1).unwrap(), Did::new(2).unwrap()]);
        assert!(matches!(
            xfer.next_step(2),
            BsStep::SendAdmin {
                message: AdminMessage::RequestBlock(_),
                ..
            }
        ));
        xfer.on_admin_delivered();
        assert!(matches!(
            xfer.next_step(3),
            BsStep::SendAdmin {
                message: AdminMessage::ChangeDataRateChannel { .. },
                ..
            }
        ));
        xfer.on_admin_delivered();
        assert!(matches!(xfer.next_step(4), BsStep::SendData(_)));
    }

    #[test]
    fn repeater_on_route_gets_its_own_permission_request() {
        let mut xfer = transfer(SHORT_TRANSFER_MAX + 1, MAX_CHUNK_SIZE);
        xfer.next_step(0);
        xfer.on_route_response(vec![
            Did::new(1).unwrap(),
            Did::new(7).unwrap(),
            Did::new(2).unwrap(),
        ]);
        xfer.next_step(1);
        xfer.on_admin_delivered();
        match xfer.next_step(2) {
            BsStep::SendAdmin {
                dst,
                message: AdminMessage::RequestRepeater { .. },
            } => assert_eq!(dst.raw(), 7),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn chunk_walks_the_data_with_frag_delay() {
        // 60 bytes = 3 packets (25 + 25 + 10).
        let mut xfer = transfer(60, MAX_CHUNK_SIZE);
        let mut now = 0u64;
        xfer.next_step(now);
        xfer.on_admin_delivered();

        let mut packets = Vec::new();
        loop {
            match xfer.next_step(now) {
                BsStep::SendData(p) => packets.push(p),
                BsStep::Idle => {
                    if xfer.phase() == BsPhase::WaitChunkResponse {
                        break;
                    }
                }
                other => panic!("unexpected step: {other:?}"),
            }
            now += u64::from(xfer.frag_delay_ms());
        }
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].byte_idx, 0);
        assert_eq!(packets[1].byte_idx, 25);
        assert_eq!(packets[2].byte_idx, 50);
        assert_eq!(packets[2].data.len(), 10);

        // Full mask completes the transfer and starts the terminate
        // exchange.
        let mut mask = ChunkMask::empty();
        for idx in 0..3 {
            mask.set(idx);
        }
        xfer.on_chunk_response(mask, now);
        assert_eq!(xfer.phase(), BsPhase::Terminate);
        assert!(matches!(
            xfer.next_step(now),
            BsStep::SendAdmin {
                message: AdminMessage::TerminateBlockStream { status: 0 },
                ..
            }
        ));
        xfer.on_admin_delivered();
        assert_eq!(
            xfer.next_step(now),
            BsStep::Done(TerminateStatus::Complete)
        );
        assert!(!xfer.in_progress());
    }

    #[test]
    fn incomplete_mask_resends_only_missing_packets() {
        let mut xfer = transfer(60, MAX_CHUNK_SIZE);
        let mut now = 0u64;
        xfer.next_step(now);
        xfer.on_admin_delivered();
        loop {
            now += 100;
            match xfer.next_step(now) {
                BsStep::SendData(_) => {}
                BsStep::Idle if xfer.phase() == BsPhase::WaitChunkResponse => break,
                other => panic!("unexpected step: {other:?}"),
            }
        }

        // Packet 1 got lost.
        let mut mask = ChunkMask::empty();
        mask.set(0);
        mask.set(2);
        xfer.on_chunk_response(mask, now);

        now += 100;
        match xfer.next_step(now) {
            BsStep::SendData(p) => assert_eq!(p.chunk_idx, 1),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn chunk_timeout_retries_then_fails() {
        let mut xfer = transfer(10, MAX_CHUNK_SIZE);
        let mut now = 0u64;
        xfer.next_step(now);
        xfer.on_admin_delivered();

        let mut sends = 0usize;
        loop {
            match xfer.next_step(now) {
                BsStep::SendData(_) => sends += 1,
                BsStep::Idle => {}
                BsStep::Done(status) => {
                    assert_eq!(status, TerminateStatus::Failed);
                    break;
                }
                other => panic!("unexpected step: {other:?}"),
            }
            now += 10_000;
            assert!(now < 10_000_000, "transfer never gave up");
        }
        // Initial send plus every retry.
        assert_eq!(sends, usize::from(MAX_RETRY) + 1);
    }

    #[test]
    fn cancel_terminates_with_canceled_status() {
        let mut xfer = transfer(10, MAX_CHUNK_SIZE);
        xfer.cancel();
        assert!(matches!(
            xfer.next_step(0),
            BsStep::SendAdmin {
                message: AdminMessage::TerminateBlockStream { status: 0x01 },
                ..
            }
        ));
        xfer.on_admin_delivered();
        assert_eq!(xfer.next_step(1), BsStep::Done(TerminateStatus::Canceled));
    }

    fn request(size: u32, chunk_size: u8) -> BlockStreamRequest {
        BlockStreamRequest {
            transfer_size: size,
            chunk_size,
            frag_delay_ms: 25,
            chunk_pause_ms: 25,
            channel: 0,
            data_rate: 0,
            timeout_ms: DEFAULT_BS_TIMEOUT_MS,
            dst: Did::new(2).unwrap(),
            priority: Priority::High,
        }
    }

    #[test]
    fn receiver_rejects_bad_requests() {
        assert!(matches!(
            BlockReceiver::new(&request(0, 40)),
            Err(SessionError::ZeroTransferSize)
        ));
        assert!(matches!(
            BlockReceiver::new(&request(10, 0)),
            Err(SessionError::InvalidChunkSize(0))
        ));
        assert!(matches!(
            BlockReceiver::new(&request(10, 41)),
            Err(SessionError::InvalidChunkSize(41))
        ));
    }

    #[test]
    fn sender_and_receiver_agree_end_to_end() {
        let data: Vec<u8> = (0..=255u8).cycle().take(3_000).collect();
        let mut xfer = BlockTransfer::new(
            Did::new(1).unwrap(),
            Did::new(2).unwrap(),
            data.clone(),
            Priority::High,
            MAX_CHUNK_SIZE,
            &block_peer(),
        )
        .unwrap();
        let mut rx = BlockReceiver::new(&xfer.request()).unwrap();

        // Fast-forward negotiation.
        let mut now = 0u64;
        xfer.next_step(now);
        xfer.on_route_response(vec![Did::new(1).unwrap(), Did::new(2).unwrap()]);
        xfer.next_step(now);
        xfer.on_admin_delivered();
        xfer.next_step(now);
        xfer.on_admin_delivered();

        let mut received = None;
        for _ in 0..10_000 {
            now += 50;
            match xfer.next_step(now) {
                BsStep::SendData(payload) => match rx.on_data(&payload).unwrap() {
                    ReceiverStep::Continue => {}
                    ReceiverStep::AckChunk(mask) => xfer.on_chunk_response(mask, now),
                    ReceiverStep::Complete(bytes) => {
                        // The last chunk completes the receiver; the
                        // sender still wants its full-mask ACK.
                        let mut mask = ChunkMask::empty();
                        for idx in 0..MAX_CHUNK_SIZE {
                            mask.set(idx);
                        }
                        xfer.on_chunk_response(mask, now);
                        received = Some(bytes);
                    }
                },
                BsStep::SendAdmin {
                    message: AdminMessage::TerminateBlockStream { status: 0 },
                    ..
                } => {
                    xfer.on_admin_delivered();
                }
                BsStep::Done(TerminateStatus::Complete) => break,
                BsStep::Idle => {}
                other => panic!("unexpected step: {other:?}"),
            }
        }
        assert_eq!(received.as_deref(), Some(&data[..]));
        assert!(!xfer.in_progress());
    }

    #[test]
    fn receiver_flags_out_of_bounds_data() {
        let mut rx = BlockReceiver::new(&request(50, 40)).unwrap();
        let payload = BlockPayload {
            msg_id: MessageId::ZERO,
            chunk_idx: 5,
            byte_idx: 0,
            data: vec![0; 25],
        };
        assert!(matches!(
            rx.on_data(&payload),
            Err(SessionError::OutOfBounds)
        ));
    }

    #[test]
    fn stream_requests_a_response_every_interval() {
        let mut stream =
            StreamSender::new(Did::new(2).unwrap(), &block_peer(), 0).unwrap();

        let p = stream.next_packet(vec![1], 100).unwrap();
        assert!(!p.response_needed);
        assert_eq!(p.elapsed_ms, 100);

        let p = stream
            .next_packet(vec![2], STREAM_RESPONSE_INTERVAL_MS)
            .unwrap();
        assert!(p.response_needed);

        // No second request while one is outstanding.
        let p = stream
            .next_packet(vec![3], STREAM_RESPONSE_INTERVAL_MS + 100)
            .unwrap();
        assert!(!p.response_needed);

        stream.on_ack();
        assert!(!stream.peer_silent(2 * STREAM_RESPONSE_INTERVAL_MS));
    }

    #[test]
    fn silent_stream_peer_is_detected() {
        let mut stream =
            StreamSender::new(Did::new(2).unwrap(), &block_peer(), 0).unwrap();
        stream
            .next_packet(vec![1], STREAM_RESPONSE_INTERVAL_MS)
            .unwrap();
        assert!(stream.peer_silent(2 * STREAM_RESPONSE_INTERVAL_MS));

        let msg = stream.terminate(TerminateStatus::Failed);
        assert!(matches!(
            msg,
            AdminMessage::TerminateBlockStream { status: 0x02 }
        ));
        assert!(!stream.in_progress());
    }

    #[test]
    fn stream_needs_a_capable_peer() {
        assert!(matches!(
            StreamSender::new(Did::new(2).unwrap(), &Features::simple_client(), 0),
            Err(SessionError::NotCapable("stream"))
        ));
    }

    #[test]
    fn only_one_session_runs_at_a_time() {
        let mut slot = ActiveSession::default();
        assert!(slot.is_idle());

        slot.start_block(transfer(100, MAX_CHUNK_SIZE)).unwrap();
        assert!(!slot.is_idle());
        assert!(matches!(
            slot.start_stream(StreamSender::new(Did::new(2).unwrap(), &block_peer(), 0).unwrap()),
            Err(SessionError::AlreadyInProgress)
        ));

        slot.finish();
        slot.start_stream(StreamSender::new(Did::new(2).unwrap(), &block_peer(), 0).unwrap())
            .unwrap();
    }
}
