//! Power-of-two routing table.
//!
//! One finger per bit of the id: finger `i` covers the clockwise range
//! `[id + 2^i, id + 2^(i+1) - 1]` and names the peer believed to succeed its
//! lower bound. The ranges partition the whole ring, so a lookup always
//! lands in exactly one finger.

use std::sync::RwLock;

use crate::common::{Id, PeerInfo, ID_BITS};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Finger {
    pub lower: Id,
    pub upper: Id,
    pub successor: PeerInfo,
}

#[derive(Debug)]
pub(crate) struct FingerTable {
    starting_key: Id,
    table: RwLock<Vec<Finger>>,
}

impl FingerTable {
    /// Builds a full table with every finger pointing at the owning peer,
    /// the only correct state before anything else is known about the ring.
    pub fn new(starting_key: Id, own: PeerInfo) -> FingerTable {
        let table = (0..ID_BITS as usize)
            .map(|i| {
                let (lower, upper) = Self::range_of(starting_key, i);
                Finger {
                    lower,
                    upper,
                    successor: own.clone(),
                }
            })
            .collect();

        FingerTable {
            starting_key,
            table: RwLock::new(table),
        }
    }

    pub fn len(&self) -> usize {
        ID_BITS as usize
    }

    /// The clockwise range covered by the nth finger.
    pub fn nth_range(&self, n: usize) -> (Id, Id) {
        Self::range_of(self.starting_key, n)
    }

    fn range_of(starting_key: Id, n: usize) -> (Id, Id) {
        let lower = starting_key.add(1u128 << n);
        // 2^(n+1) wraps to zero at the last finger, whose range therefore
        // ends one short of the starting key.
        let width = 1u128.checked_shl(n as u32 + 1).unwrap_or(0);
        let upper = starting_key.add(width).sub(1);
        (lower, upper)
    }

    pub fn nth_entry(&self, n: usize) -> PeerInfo {
        self.table
            .read()
            .expect("finger table lock poisoned")
            .get(n)
            .expect("finger index within ID_BITS")
            .successor
            .clone()
    }

    /// The successor of the finger whose range contains the key.
    pub fn lookup(&self, key: Id) -> Option<PeerInfo> {
        let table = self.table.read().expect("finger table lock poisoned");

        table
            .iter()
            .find(|finger| key.in_between(finger.lower, finger.upper, true))
            .map(|finger| finger.successor.clone())
    }

    pub fn edit_nth(&self, n: usize, successor: PeerInfo) {
        let mut table = self.table.write().expect("finger table lock poisoned");
        table[n].successor = successor;
    }

    /// Point every finger whose lower bound lies in the peer's claimed range
    /// `[min_key, id]` at that peer. Idempotent for correct claims.
    pub fn adjust(&self, peer: &PeerInfo) {
        let mut table = self.table.write().expect("finger table lock poisoned");

        for finger in table.iter_mut() {
            if finger.lower.in_between(peer.min_key, peer.id, true) {
                finger.successor = peer.clone();
            }
        }
    }

    /// Substitute every occurrence of a failed peer with its replacement.
    pub fn replace_dead_peer(&self, dead: &PeerInfo, replacement: &PeerInfo) {
        let mut table = self.table.write().expect("finger table lock poisoned");

        for finger in table.iter_mut() {
            if finger.successor.id == dead.id {
                finger.successor = replacement.clone();
            }
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<Finger> {
        self.table.read().expect("finger table lock poisoned").clone()
    }
}
