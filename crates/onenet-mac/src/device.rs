//! Per-peer state and the anti-replay message-ID window.
//!
//! Every peer a device exchanges singles with gets a [`SendingDevice`]
//! record tracking the last message ID seen from it and the next one to
//! use toward it. Acceptance is strict next-or-equal by default: the
//! last-accepted ID is an idempotent retransmission, the expected next
//! ID is a new message, and anything else is rejected. A device can be
//! switched to lenient mode, which accepts any ID and resynchronizes.

use onenet_core::features::Features;
use onenet_core::types::{Did, MessageId};

use crate::error::MacError;

/// Verdict on a received message ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgIdDisposition {
    /// A new message; process and ACK it.
    NewMessage,
    /// The last-accepted ID again; re-ACK without reprocessing.
    Retransmission,
    /// Out of order or replayed; NACK with an invalid-msg-id reason.
    Rejected,
}

/// State kept for one peer.
#[derive(Debug, Clone)]
pub struct SendingDevice {
    pub did: Did,
    pub features: Features,
    pub data_rate: u8,
    /// Reject IDs outside the next-or-equal window.
    pub reject_invalid_msg_id: bool,
    /// Send to this peer under the old key until it confirms the
    /// current one.
    pub use_old_key: bool,
    pub keep_alive_ms: u32,
    next_outbound: MessageId,
    last_accepted: Option<MessageId>,
}

impl SendingDevice {
    pub fn new(did: Did) -> Self {
        Self {
            did,
            features: Features::UNKNOWN,
            data_rate: Features::BASE_DATA_RATE,
            reject_invalid_msg_id: true,
            use_old_key: false,
            keep_alive_ms: 0,
            next_outbound: MessageId::ZERO,
            last_accepted: None,
        }
    }

    pub fn with_initial_msg_id(mut self, id: MessageId) -> Self {
        self.next_outbound = id;
        self
    }

    /// Take the next outbound message ID for this peer, advancing the
    /// counter.
    pub fn next_message_id(&mut self) -> MessageId {
        let id = self.next_outbound;
        self.next_outbound = id.next();
        id
    }

    /// Judge a received message ID against the window and update it
    /// when the message is accepted.
    pub fn validate_message_id(&mut self, received: MessageId) -> MsgIdDisposition {
        match self.last_accepted {
            None => {
                self.last_accepted = Some(received);
                MsgIdDisposition::NewMessage
            }
            Some(last) if received == last => MsgIdDisposition::Retransmission,
            Some(last) if received == last.next() => {
                self.last_accepted = Some(received);
                MsgIdDisposition::NewMessage
            }
            Some(_) if self.reject_invalid_msg_id => MsgIdDisposition::Rejected,
            Some(_) => {
                // Lenient mode: accept and resynchronize the window.
                self.last_accepted = Some(received);
                MsgIdDisposition::NewMessage
            }
        }
    }

    pub fn last_accepted(&self) -> Option<MessageId> {
        self.last_accepted
    }
}

/// Fixed-capacity table of known peers.
///
/// The capacity is set once at construction; inserting past it fails
/// rather than growing.
#[derive(Debug, Clone)]
pub struct DeviceTable {
    entries: Vec<SendingDevice>,
    capacity: usize,
}

impl DeviceTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, did: Did) -> Option<&SendingDevice> {
        self.entries.iter().find(|d| d.did == did)
    }

    pub fn get_mut(&mut self, did: Did) -> Option<&mut SendingDevice> {
        self.entries.iter_mut().find(|d| d.did == did)
    }

    pub fn insert(&mut self, device: SendingDevice) -> Result<(), MacError> {
        if self.get(device.did).is_some() {
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(MacError::DeviceTableFull);
        }
        self.entries.push(device);
        Ok(())
    }

    /// Fetch a peer record, creating it if there is room.
    pub fn get_or_insert(&mut self, did: Did) -> Result<&mut SendingDevice, MacError> {
        if self.get(did).is_none() {
            self.insert(SendingDevice::new(did))?;
        }
        Ok(self
            .get_mut(did)
            .unwrap_or_else(|| unreachable!("inserted above")))
    }

    pub fn remove(&mut self, did: Did) -> Option<SendingDevice> {
        let idx = self.entries.iter().position(|d| d.did == did)?;
        Some(self.entries.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SendingDevice> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SendingDevice> {
        self.entries.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SendingDevice {
        SendingDevice::new(Did::new(0x004).unwrap())
    }

    fn id(raw: u16) -> MessageId {
        MessageId::new(raw).unwrap()
    }

    #[test]
    fn outbound_ids_increment_mod_4096() {
        let mut dev = device().with_initial_msg_id(id(4094));
        assert_eq!(dev.next_message_id().raw(), 4094);
        assert_eq!(dev.next_message_id().raw(), 4095);
        assert_eq!(dev.next_message_id().raw(), 0);
        assert_eq!(dev.next_message_id().raw(), 1);
    }

    #[test]
    fn first_inbound_id_is_accepted() {
        let mut dev = device();
        assert_eq!(dev.validate_message_id(id(500)), MsgIdDisposition::NewMessage);
        assert_eq!(dev.last_accepted(), Some(id(500)));
    }

    #[test]
    fn repeat_of_last_accepted_is_idempotent() {
        let mut dev = device();
        dev.validate_message_id(id(7));
        assert_eq!(
            dev.validate_message_id(id(7)),
            MsgIdDisposition::Retransmission
        );
        // The window did not advance.
        assert_eq!(dev.last_accepted(), Some(id(7)));
    }

    #[test]
    fn expected_next_advances_the_window() {
        let mut dev = device();
        dev.validate_message_id(id(7));
        assert_eq!(dev.validate_message_id(id(8)), MsgIdDisposition::NewMessage);
        assert_eq!(dev.last_accepted(), Some(id(8)));
    }

    #[test]
    fn strict_mode_rejects_ids_two_ahead() {
        let mut dev = device();
        dev.validate_message_id(id(7));
        assert_eq!(dev.validate_message_id(id(9)), MsgIdDisposition::Rejected);
        assert_eq!(dev.validate_message_id(id(6)), MsgIdDisposition::Rejected);
        assert_eq!(dev.last_accepted(), Some(id(7)));
    }

    #[test]
    fn window_wraps_at_4095() {
        let mut dev = device();
        dev.validate_message_id(id(4095));
        assert_eq!(dev.validate_message_id(id(0)), MsgIdDisposition::NewMessage);
    }

    #[test]
    fn lenient_mode_resynchronizes() {
        let mut dev = device();
        dev.reject_invalid_msg_id = false;
        dev.validate_message_id(id(7));
        assert_eq!(dev.validate_message_id(id(100)), MsgIdDisposition::NewMessage);
        assert_eq!(dev.last_accepted(), Some(id(100)));
    }

    #[test]
    fn table_capacity_is_enforced() {
        let mut table = DeviceTable::new(2);
        table.insert(SendingDevice::new(Did::new(2).unwrap())).unwrap();
        table.insert(SendingDevice::new(Did::new(3).unwrap())).unwrap();
        assert!(matches!(
            table.insert(SendingDevice::new(Did::new(4).unwrap())),
            Err(MacError::DeviceTableFull)
        ));
        // Re-inserting an existing DID is a no-op, not an error.
        table.insert(SendingDevice::new(Did::new(2).unwrap())).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_frees_a_slot() {
        let mut table = DeviceTable::new(1);
        table.insert(SendingDevice::new(Did::new(2).unwrap())).unwrap();
        assert!(table.remove(Did::new(2).unwrap()).is_some());
        assert!(table.remove(Did::new(2).unwrap()).is_none());
        table.insert(SendingDevice::new(Did::new(5).unwrap())).unwrap();
    }
}
