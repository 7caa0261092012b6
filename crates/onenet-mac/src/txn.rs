//! Single-data transactions and retry timing.

use onenet_core::packet::HopsField;
use onenet_core::pid::Pid;
use onenet_core::types::{Did, MessageId, Priority};

/// Attempts allowed per transaction before it is declared failed.
pub const MAX_RETRY: u8 = 8;

/// Base response deadline for a single attempt.
pub const RESPONSE_TIMEOUT_MS: u64 = 50;

/// Additional deadline per attempt already spent.
pub const RETRY_BACKOFF_STEP_MS: u64 = 10;

/// How a finished transaction is reported upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Success,
    SingleFail,
    BlockFail,
    StreamFail,
    TimedOut,
    Canceled,
}

/// Response deadline offset for attempt number `attempt` (0-based).
/// Later attempts wait longer, spreading retries out under contention.
#[must_use]
pub fn backoff_for_attempt(attempt: u8, base_ms: u64) -> u64 {
    base_ms + RETRY_BACKOFF_STEP_MS * u64::from(attempt)
}

/// One in-flight single-data transaction.
#[derive(Debug, Clone)]
pub struct SingleTxn {
    pub dst: Did,
    pub priority: Priority,
    pub msg_id: MessageId,
    pub pid: Pid,
    /// Sealed (CRC set), unencrypted raw payload. Rebuilt frames for
    /// retries come from this, so every attempt is byte-identical.
    pub raw_payload: Vec<u8>,
    /// Trailing hops byte for multi-hop PIDs. Retries must carry the
    /// same hops field as the first attempt.
    pub hops: Option<HopsField>,
    /// Attempts already transmitted.
    pub attempts: u8,
    /// Base deadline, mutable via slow-down/speed-up handles.
    pub response_timeout_ms: u64,
    /// Tick at which the current attempt gives up waiting.
    pub response_deadline: u64,
}

impl SingleTxn {
    pub fn new(
        dst: Did,
        priority: Priority,
        msg_id: MessageId,
        pid: Pid,
        raw_payload: Vec<u8>,
        hops: Option<HopsField>,
    ) -> Self {
        Self {
            dst,
            priority,
            msg_id,
            pid,
            raw_payload,
            hops,
            attempts: 0,
            response_timeout_ms: RESPONSE_TIMEOUT_MS,
            response_deadline: 0,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.attempts >= MAX_RETRY
    }

    /// Record one transmitted attempt and arm its response deadline.
    pub fn record_attempt(&mut self, now_ms: u64) {
        self.response_deadline = now_ms + backoff_for_attempt(self.attempts, self.response_timeout_ms);
        self.attempts += 1;
    }

    pub fn response_overdue(&self, now_ms: u64) -> bool {
        now_ms >= self.response_deadline
    }

    /// Stretch or shrink the per-attempt deadline (slow-down/speed-up
    /// handles).
    pub fn set_response_timeout(&mut self, timeout_ms: u64) {
        self.response_timeout_ms = timeout_ms.max(1);
    }
}
