//! Device capability flags.
//!
//! A 4-byte block exchanged during join and status queries. Byte 0 is
//! the capability bitmask, byte 1 the supported data rates plus two
//! extra capability bits, byte 2 the queue geometry, byte 3 the peer
//! and hop limits.

use core::fmt;

/// A device's 4-byte feature block.
#[derive(Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Features([u8; 4]);

const DR_CHANNEL_CHANGE: u8 = 0x01;
const PEER: u8 = 0x02;
const NON_SIMPLE: u8 = 0x04;
const NEVER_SLEEPS: u8 = 0x08;
const BLOCK: u8 = 0x10;
const MULTI_HOP: u8 = 0x20;
const MULTI_HOP_REPEAT: u8 = 0x40;
const STREAM: u8 = 0x80;

const DATA_RATE_MASK: u8 = 0x3F;
const EXTENDED_SINGLE: u8 = 0x40;
const ROUTE: u8 = 0x80;

impl Features {
    /// Sentinel for a peer whose features have not been learned yet.
    pub const UNKNOWN: Features = Features([0xFF; 4]);

    /// The base data rate every device supports.
    pub const BASE_DATA_RATE: u8 = 0;

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// A minimal client: base data rate only, no optional capability.
    pub const fn simple_client() -> Self {
        Features([NEVER_SLEEPS, 0x01, 0x11, 0x00])
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    pub fn dr_channel_change_capable(&self) -> bool {
        self.0[0] & DR_CHANNEL_CHANGE != 0
    }

    pub fn peer_capable(&self) -> bool {
        self.0[0] & PEER != 0
    }

    pub fn is_simple_client(&self) -> bool {
        self.0[0] & NON_SIMPLE == 0
    }

    pub fn never_sleeps(&self) -> bool {
        self.0[0] & NEVER_SLEEPS != 0
    }

    pub fn block_capable(&self) -> bool {
        self.0[0] & BLOCK != 0
    }

    pub fn multi_hop_capable(&self) -> bool {
        self.0[0] & MULTI_HOP != 0
    }

    pub fn multi_hop_repeat_capable(&self) -> bool {
        self.0[0] & MULTI_HOP_REPEAT != 0
    }

    pub fn stream_capable(&self) -> bool {
        self.0[0] & STREAM != 0
    }

    pub fn extended_single_capable(&self) -> bool {
        self.0[1] & EXTENDED_SINGLE != 0
    }

    pub fn route_capable(&self) -> bool {
        self.0[1] & ROUTE != 0
    }

    /// Whether data rate `rate` (0..=5) is supported.
    pub fn data_rate_supported(&self, rate: u8) -> bool {
        rate < 6 && self.0[1] & DATA_RATE_MASK & (1 << rate) != 0
    }

    /// The highest data rate both feature blocks support.
    pub fn highest_common_data_rate(&self, other: &Features) -> u8 {
        let common = self.0[1] & other.0[1] & DATA_RATE_MASK;
        (0..6).rev().find(|r| common & (1 << r) != 0).unwrap_or(0)
    }

    pub fn queue_size(&self) -> u8 {
        self.0[2] >> 4
    }

    pub fn queue_level(&self) -> u8 {
        self.0[2] & 0xF
    }

    pub fn max_peers(&self) -> u8 {
        self.0[3] >> 4
    }

    pub fn max_hops(&self) -> u8 {
        self.0[3] & 0xF
    }

    // Builder-style setters used when declaring our own capabilities.

    pub fn with_flag(mut self, flag: u8, on: bool) -> Self {
        if on {
            self.0[0] |= flag;
        } else {
            self.0[0] &= !flag;
        }
        self
    }

    pub fn with_block(self, on: bool) -> Self {
        self.with_flag(BLOCK, on)
    }

    pub fn with_stream(self, on: bool) -> Self {
        self.with_flag(STREAM, on)
    }

    pub fn with_multi_hop(self, on: bool) -> Self {
        self.with_flag(MULTI_HOP, on)
    }

    pub fn with_multi_hop_repeat(self, on: bool) -> Self {
        self.with_flag(MULTI_HOP_REPEAT, on)
    }

    pub fn with_peer(self, on: bool) -> Self {
        self.with_flag(PEER, on)
    }

    pub fn with_data_rate(mut self, rate: u8) -> Self {
        if rate < 6 {
            self.0[1] |= 1 << rate;
        }
        self
    }
}

impl fmt::Debug for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Features({:02x}{:02x}{:02x}{:02x})",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits() {
        let features = Features::simple_client()
            .with_block(true)
            .with_stream(true)
            .with_peer(true);
        assert!(features.block_capable());
        assert!(features.stream_capable());
        assert!(features.peer_capable());
        assert!(features.never_sleeps());
        assert!(features.is_simple_client());
        assert!(!features.multi_hop_capable());
    }

    #[test]
    fn unknown_sentinel() {
        assert!(Features::UNKNOWN.is_unknown());
        assert!(!Features::simple_client().is_unknown());
    }

    #[test]
    fn data_rate_negotiation_picks_highest_common() {
        let a = Features::new([0, 0b0000_0111, 0, 0]);
        let b = Features::new([0, 0b0000_0101, 0, 0]);
        assert_eq!(a.highest_common_data_rate(&b), 2);
        assert!(a.data_rate_supported(1));
        assert!(!b.data_rate_supported(1));
        assert!(!a.data_rate_supported(6));
    }

    #[test]
    fn base_rate_is_fallback_when_nothing_common() {
        let a = Features::new([0, 0b10, 0, 0]);
        let b = Features::new([0, 0b100, 0, 0]);
        assert_eq!(a.highest_common_data_rate(&b), 0);
    }

    #[test]
    fn queue_and_limit_nibbles() {
        let features = Features::new([0, 0, 0x53, 0x82]);
        assert_eq!(features.queue_size(), 5);
        assert_eq!(features.queue_level(), 3);
        assert_eq!(features.max_peers(), 8);
        assert_eq!(features.max_hops(), 2);
    }
}
