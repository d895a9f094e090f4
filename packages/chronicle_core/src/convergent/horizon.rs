//! Causal context tracking via Horizons
//!
//! A Horizon records what operations a peer had seen when it performed an
//! action. This enables informed-remove semantics: removes only affect
//! state the remover knew about.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric identity of a peer for the lifetime of its session.
pub type PeerId = u64;

/// Sequence number within a peer's operation stream.
pub type SeqNum = u64;

/// A Horizon captures the causal context of an operation.
///
/// It maps each known peer to the highest sequence number seen from that
/// peer. When comparing operations, we can determine if one "happened
/// before" another, or if they were concurrent (neither knew about the
/// other).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    /// Map from peer id to the highest sequence number seen from that peer
    seen: BTreeMap<PeerId, SeqNum>,
}

impl Horizon {
    /// Create an empty horizon (knows nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the sequence number seen from a peer (0 if never seen).
    pub fn get(&self, peer: PeerId) -> SeqNum {
        self.seen.get(&peer).copied().unwrap_or(0)
    }

    /// Record having seen an operation from a peer.
    pub fn observe(&mut self, peer: PeerId, seq: SeqNum) {
        let current = self.seen.entry(peer).or_insert(0);
        if seq > *current {
            *current = seq;
        }
    }

    /// Merge another horizon into this one (take max of each peer).
    pub fn merge(&mut self, other: &Horizon) {
        for (peer, seq) in &other.seen {
            self.observe(*peer, *seq);
        }
    }

    /// Check if this horizon has seen a specific operation.
    pub fn has_seen(&self, peer: PeerId, seq: SeqNum) -> bool {
        self.get(peer) >= seq
    }

    /// Check if this horizon dominates another (has seen everything other
    /// has seen).
    pub fn dominates(&self, other: &Horizon) -> bool {
        other.seen.iter().all(|(p, s)| self.get(*p) >= *s)
    }

    /// Check if two horizons are concurrent (neither dominates the other).
    pub fn is_concurrent_with(&self, other: &Horizon) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    /// Get all peers this horizon knows about.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.seen.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_observe_and_get() {
        let mut h = Horizon::new();
        assert_eq!(h.get(1), 0);

        h.observe(1, 5);
        assert_eq!(h.get(1), 5);

        // Doesn't go backwards
        h.observe(1, 3);
        assert_eq!(h.get(1), 5);

        h.observe(1, 7);
        assert_eq!(h.get(1), 7);
    }

    #[test]
    fn test_horizon_dominates() {
        let mut h1 = Horizon::new();
        h1.observe(1, 5);
        h1.observe(2, 3);

        let mut h2 = Horizon::new();
        h2.observe(1, 3);
        h2.observe(2, 2);

        assert!(h1.dominates(&h2));
        assert!(!h2.dominates(&h1));
    }

    #[test]
    fn test_horizon_concurrent() {
        let mut h1 = Horizon::new();
        h1.observe(1, 5);
        h1.observe(2, 2);

        let mut h2 = Horizon::new();
        h2.observe(1, 3);
        h2.observe(2, 4);

        // Neither dominates: h1 ahead on peer 1, h2 ahead on peer 2
        assert!(h1.is_concurrent_with(&h2));
    }

    #[test]
    fn test_horizon_merge() {
        let mut h1 = Horizon::new();
        h1.observe(1, 5);

        let mut h2 = Horizon::new();
        h2.observe(1, 2);
        h2.observe(2, 9);

        h1.merge(&h2);
        assert_eq!(h1.get(1), 5);
        assert_eq!(h1.get(2), 9);
    }
}
