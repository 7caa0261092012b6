//! Newtype wrappers for protocol address and identifier fields.
//!
//! These types keep 12-bit device addresses, 36-bit network identifiers,
//! unit nibbles, and rolling message IDs from being mixed with plain
//! integers or with each other.

use core::fmt;

use crate::error::InvalidValue;

/// A 12-bit raw device identifier, unique within one network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct Did(u16);

impl Did {
    pub const MAX: u16 = 0xFFF;

    /// The broadcast / not-yet-assigned address.
    pub const BROADCAST: Did = Did(0x000);

    /// The network master's address.
    pub const MASTER: Did = Did(0x001);

    /// The first address handed out to a joining client.
    pub const FIRST_CLIENT: Did = Did(0x002);

    pub fn new(raw: u16) -> Result<Self, InvalidValue> {
        if raw > Self::MAX {
            return Err(InvalidValue {
                field: "did",
                max: Self::MAX as u64,
                actual: raw as u64,
            });
        }
        Ok(Did(raw))
    }

    /// For values already known to fit in 12 bits (decoder internals).
    pub(crate) const fn new_unchecked(raw: u16) -> Self {
        Did(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// The next client address after this one, if any remain.
    pub fn next_client(self) -> Option<Did> {
        if self.0 >= Self::MAX {
            None
        } else {
            Some(Did(self.0 + 1))
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03x}", self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({:03x})", self.0)
    }
}

/// A 36-bit network identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct NetworkId(u64);

impl NetworkId {
    pub const MAX: u64 = 0xF_FFFF_FFFF;

    /// Placeholder for a device that has not joined a network yet.
    pub const UNASSIGNED: NetworkId = NetworkId(0);

    pub fn new(raw: u64) -> Result<Self, InvalidValue> {
        if raw > Self::MAX {
            return Err(InvalidValue {
                field: "nid",
                max: Self::MAX,
                actual: raw,
            });
        }
        Ok(NetworkId(raw))
    }

    /// For values already known to fit in 36 bits (decoder internals).
    pub(crate) const fn new_unchecked(raw: u64) -> Self {
        NetworkId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:09x}", self.0)
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkId({:09x})", self.0)
    }
}

/// A device unit nibble. `0xF` is the wildcard for peer assignments.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct UnitId(u8);

impl UnitId {
    pub const MAX: u8 = 0xF;
    pub const WILDCARD: UnitId = UnitId(0xF);

    pub fn new(raw: u8) -> Result<Self, InvalidValue> {
        if raw > Self::MAX {
            return Err(InvalidValue {
                field: "unit",
                max: Self::MAX as u64,
                actual: raw as u64,
            });
        }
        Ok(UnitId(raw))
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn is_wildcard(self) -> bool {
        self == Self::WILDCARD
    }

    /// True when `other` is this unit or either side is the wildcard.
    pub fn matches(self, other: UnitId) -> bool {
        self == other || self.is_wildcard() || other.is_wildcard()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({:x})", self.0)
    }
}

/// A 12-bit rolling message identifier (0..=4095, wrapping).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct MessageId(u16);

impl MessageId {
    pub const MAX: u16 = 0xFFF;
    pub const ZERO: MessageId = MessageId(0);

    pub fn new(raw: u16) -> Result<Self, InvalidValue> {
        if raw > Self::MAX {
            return Err(InvalidValue {
                field: "msg_id",
                max: Self::MAX as u64,
                actual: raw as u64,
            });
        }
        Ok(MessageId(raw))
    }

    /// For values already known to fit in 12 bits (decoder internals).
    pub(crate) const fn new_unchecked(raw: u16) -> Self {
        MessageId(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    /// The successor ID, wrapping at 4096.
    pub fn next(self) -> MessageId {
        MessageId((self.0 + 1) & Self::MAX)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Transmission priority for queued messages and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    High = 1,
}

impl Priority {
    pub fn from_raw(raw: u8) -> Result<Self, InvalidValue> {
        match raw {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::High),
            other => Err(InvalidValue {
                field: "priority",
                max: 1,
                actual: other as u64,
            }),
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_range_is_enforced() {
        assert!(Did::new(0xFFF).is_ok());
        assert!(Did::new(0x1000).is_err());
    }

    #[test]
    fn client_did_allocation_walks_upward() {
        let first = Did::FIRST_CLIENT;
        assert_eq!(first.next_client().unwrap().raw(), 0x003);
        assert_eq!(Did::new(0xFFF).unwrap().next_client(), None);
    }

    #[test]
    fn message_id_wraps_at_4096() {
        let id = MessageId::new(4095).unwrap();
        assert_eq!(id.next().raw(), 0);
        assert_eq!(MessageId::new(7).unwrap().next().raw(), 8);
    }

    #[test]
    fn wildcard_unit_matches_everything() {
        let u3 = UnitId::new(3).unwrap();
        let u5 = UnitId::new(5).unwrap();
        assert!(UnitId::WILDCARD.matches(u3));
        assert!(u3.matches(UnitId::WILDCARD));
        assert!(u3.matches(u3));
        assert!(!u3.matches(u5));
    }

    #[test]
    fn nid_range_is_enforced() {
        assert!(NetworkId::new(0xF_FFFF_FFFF).is_ok());
        assert!(NetworkId::new(0x10_0000_0000).is_err());
    }
}
