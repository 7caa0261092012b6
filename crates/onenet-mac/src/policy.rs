//! ACK/NACK disposition policy.
//!
//! Turns a received response into the engine's next move. Non-fatal
//! NACKs retry until the attempt budget runs out; fatal NACKs abort
//! immediately. Time-flavored handles adjust the retry pacing instead
//! of counting as plain pass/fail.

use onenet_core::ack_nack::{AckNack, AckNackPayload, NackReason, ResponseHandle};

use crate::txn::MAX_RETRY;

/// What the engine should do after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Transaction complete; report success.
    Complete,
    /// Retry the same transaction. `new_timeout_ms` carries a pacing
    /// adjustment from a time handle, `pause_ms` a requested delay
    /// before the retry.
    Retry {
        new_timeout_ms: Option<u64>,
        pause_ms: Option<u64>,
    },
    /// Give up and report the reason.
    Abort(NackReason),
}

/// Decide the next move given a response and the attempts already
/// spent.
#[must_use]
pub fn disposition(response: &AckNack, attempts: u8) -> ResponseAction {
    let pacing = pacing_adjustment(response);

    match response.nack_reason {
        None => ResponseAction::Complete,
        Some(reason) if reason.is_no_error() => ResponseAction::Complete,
        Some(reason) if reason.is_fatal() => ResponseAction::Abort(reason),
        Some(reason) => {
            if attempts >= MAX_RETRY {
                ResponseAction::Abort(reason)
            } else {
                ResponseAction::Retry {
                    new_timeout_ms: pacing.0,
                    pause_ms: pacing.1,
                }
            }
        }
    }
}

/// Extract pacing adjustments from time-flavored handles:
/// `(new response timeout, pause before next attempt)`.
fn pacing_adjustment(response: &AckNack) -> (Option<u64>, Option<u64>) {
    let AckNackPayload::TimeMs(ms) = response.payload else {
        return (None, None);
    };
    let ms = u64::from(ms);
    match response.handle {
        ResponseHandle::SlowDownTimeMs
        | ResponseHandle::SpeedUpTimeMs
        | ResponseHandle::ResponseTimeMs
        | ResponseHandle::TimeoutMs => (Some(ms), None),
        ResponseHandle::PauseTimeMs => (None, Some(ms)),
        _ => (None, None),
    }
}
