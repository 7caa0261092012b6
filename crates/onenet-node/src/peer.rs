//! Peer assignments.
//!
//! A peer assignment connects one of this device's units to a unit on
//! another device, so an application message raised on the source unit
//! fans out to every assigned peer without involving the master. The
//! wildcard unit `0xF` matches any unit on either side.

use onenet_core::types::{Did, UnitId};

/// One source-unit to peer-unit connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAssignment {
    pub src_unit: UnitId,
    pub peer: Did,
    pub peer_unit: UnitId,
}

/// Fixed-capacity peer assignment table.
#[derive(Debug, Clone)]
pub struct PeerTable {
    entries: Vec<PeerAssignment>,
    capacity: usize,
}

impl PeerTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Add an assignment. Duplicates are a no-op; a full table refuses.
    pub fn assign(&mut self, assignment: PeerAssignment) -> bool {
        if self.entries.contains(&assignment) {
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.entries.push(assignment);
        true
    }

    /// Remove every assignment matching the given triple, honoring
    /// wildcards on both unit fields.
    pub fn unassign(&mut self, src_unit: UnitId, peer: Did, peer_unit: UnitId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|a| {
            !(a.peer == peer && a.src_unit.matches(src_unit) && a.peer_unit.matches(peer_unit))
        });
        before - self.entries.len()
    }

    /// Remove every assignment involving `peer`.
    pub fn remove_peer(&mut self, peer: Did) -> usize {
        let before = self.entries.len();
        self.entries.retain(|a| a.peer != peer);
        before - self.entries.len()
    }

    /// The peers a message raised on `src_unit` should fan out to.
    pub fn targets_for(&self, src_unit: UnitId) -> Vec<(Did, UnitId)> {
        self.entries
            .iter()
            .filter(|a| a.src_unit.matches(src_unit))
            .map(|a| (a.peer, a.peer_unit))
            .collect()
    }
}
