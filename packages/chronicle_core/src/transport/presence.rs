//! Live peer roster
//!
//! Tracks which peers are currently reachable in a room. Membership is
//! heartbeat-based and ephemeral: entries appear on the first beacon,
//! refresh on every subsequent one, and disappear on a leave notice or
//! when the liveness window elapses without a beacon. Nothing here is
//! replicated document state.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::convergent::PeerId;

use super::connection::PresenceBeacon;

/// Presence payload for a single reachable peer.
#[derive(Clone, Debug)]
pub struct PresenceInfo {
    pub peer_id: PeerId,
    pub display_name: String,
    pub last_seen: Instant,
}

/// A roster membership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerChange {
    Added(PeerId),
    Updated(PeerId),
    Removed(PeerId),
}

/// The live set of reachable peers, including ourselves.
pub struct Roster {
    peers: RwLock<HashMap<PeerId, PresenceInfo>>,
    change_tx: broadcast::Sender<PeerChange>,
}

impl Roster {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            peers: RwLock::new(HashMap::new()),
            change_tx,
        }
    }

    /// Subscribe to membership changes.
    pub fn changes(&self) -> broadcast::Receiver<PeerChange> {
        self.change_tx.subscribe()
    }

    /// Record a beacon, adding or refreshing the peer.
    pub fn observe(&self, beacon: &PresenceBeacon) {
        let change = {
            let mut peers = self.peers.write().expect("roster lock poisoned");
            let existed = peers.contains_key(&beacon.peer_id);
            peers.insert(
                beacon.peer_id,
                PresenceInfo {
                    peer_id: beacon.peer_id,
                    display_name: beacon.display_name.clone(),
                    last_seen: Instant::now(),
                },
            );
            if existed {
                PeerChange::Updated(beacon.peer_id)
            } else {
                PeerChange::Added(beacon.peer_id)
            }
        };
        if matches!(change, PeerChange::Added(_)) {
            log::info!("peer {} joined the roster", beacon.peer_id);
        }
        let _ = self.change_tx.send(change);
    }

    /// Remove a peer outright (orderly leave).
    pub fn remove(&self, peer_id: PeerId) {
        let removed = self
            .peers
            .write()
            .expect("roster lock poisoned")
            .remove(&peer_id)
            .is_some();
        if removed {
            log::info!("peer {peer_id} left the roster");
            let _ = self.change_tx.send(PeerChange::Removed(peer_id));
        }
    }

    /// Drop peers whose last beacon is older than the liveness window.
    /// `keep` is exempt (we never prune ourselves).
    pub fn prune(&self, window: Duration, keep: PeerId) {
        let now = Instant::now();
        let expired: Vec<PeerId> = {
            let peers = self.peers.read().expect("roster lock poisoned");
            peers
                .values()
                .filter(|p| p.peer_id != keep && now.duration_since(p.last_seen) > window)
                .map(|p| p.peer_id)
                .collect()
        };
        for peer_id in expired {
            log::warn!("peer {peer_id} timed out of the roster");
            self.remove(peer_id);
        }
    }

    /// Currently reachable peer ids, ascending.
    pub fn connected_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .read()
            .expect("roster lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.peers
            .read()
            .expect("roster lock poisoned")
            .contains_key(&peer_id)
    }

    pub fn get(&self, peer_id: PeerId) -> Option<PresenceInfo> {
        self.peers
            .read()
            .expect("roster lock poisoned")
            .get(&peer_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("roster lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(peer_id: PeerId, name: &str) -> PresenceBeacon {
        PresenceBeacon {
            peer_id,
            display_name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_observe_adds_then_updates() {
        let roster = Roster::new();
        let mut rx = roster.changes();

        roster.observe(&beacon(5, "ana"));
        assert_eq!(rx.try_recv().unwrap(), PeerChange::Added(5));

        roster.observe(&beacon(5, "ana"));
        assert_eq!(rx.try_recv().unwrap(), PeerChange::Updated(5));

        assert_eq!(roster.connected_ids(), vec![5]);
        assert_eq!(roster.get(5).unwrap().display_name, "ana");
    }

    #[tokio::test]
    async fn test_connected_ids_sorted() {
        let roster = Roster::new();
        roster.observe(&beacon(9, "c"));
        roster.observe(&beacon(2, "a"));
        roster.observe(&beacon(5, "b"));
        assert_eq!(roster.connected_ids(), vec![2, 5, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_stale_peers_but_not_self() {
        let roster = Roster::new();
        roster.observe(&beacon(1, "me"));
        roster.observe(&beacon(2, "other"));

        tokio::time::advance(Duration::from_secs(10)).await;
        roster.observe(&beacon(3, "fresh"));

        roster.prune(Duration::from_secs(5), 1);
        assert_eq!(roster.connected_ids(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_remove_emits_once() {
        let roster = Roster::new();
        roster.observe(&beacon(4, "d"));
        let mut rx = roster.changes();

        roster.remove(4);
        assert_eq!(rx.try_recv().unwrap(), PeerChange::Removed(4));

        roster.remove(4);
        assert!(rx.try_recv().is_err());
    }
}
