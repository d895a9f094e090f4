//! In-process room simulator
//!
//! Provides a simulated rendezvous network where multiple peers can join
//! rooms and broadcast to each other entirely in-process. Used for
//! integration testing and the CLI demo without requiring real network
//! plumbing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::convergent::PeerId;

use super::connection::{RoomId, RoomLink, TransportError};

/// The simulated rendezvous medium. Rooms exist while they have members.
pub struct SimNetwork {
    rooms: Mutex<HashMap<RoomId, HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>,
    /// Ids are handed out in join order, which keeps tests deterministic.
    next_peer_id: AtomicU64,
}

impl SimNetwork {
    /// Create a new simulated network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Join a room, receiving a stable peer identity for the lifetime of
    /// the returned link.
    pub fn join(self: &Arc<Self>, room_id: &str) -> SimRoomLink {
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        self.rooms
            .lock()
            .expect("rooms lock poisoned")
            .entry(room_id.to_string())
            .or_default()
            .insert(peer_id, tx);

        log::debug!("peer {peer_id} joined room '{room_id}'");
        SimRoomLink {
            peer_id,
            room_id: room_id.to_string(),
            network: Arc::clone(self),
            rx: tokio::sync::Mutex::new(rx),
            connected: AtomicBool::new(true),
        }
    }

    /// Fan bytes out to every member of the room except the sender.
    fn broadcast_from(&self, room_id: &str, sender: PeerId, data: &[u8]) {
        let rooms = self.rooms.lock().expect("rooms lock poisoned");
        if let Some(members) = rooms.get(room_id) {
            for (peer_id, tx) in members {
                if *peer_id != sender {
                    let _ = tx.send(data.to_vec());
                }
            }
        }
    }

    fn remove_member(&self, room_id: &str, peer_id: PeerId) {
        let mut rooms = self.rooms.lock().expect("rooms lock poisoned");
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(&peer_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    /// Number of members currently joined to a room.
    pub fn room_size(&self, room_id: &str) -> usize {
        self.rooms
            .lock()
            .expect("rooms lock poisoned")
            .get(room_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// A simulated room membership backed by unbounded channels.
pub struct SimRoomLink {
    peer_id: PeerId,
    room_id: RoomId,
    network: Arc<SimNetwork>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    connected: AtomicBool,
}

#[async_trait]
impl RoomLink for SimRoomLink {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.network
            .broadcast_from(&self.room_id, self.peer_id, data);
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Disconnected)
    }

    fn leave(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.network.remove_member(&self.room_id, self.peer_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SimRoomLink {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_other_members_only() {
        let network = SimNetwork::new();
        let link_a = network.join("room");
        let link_b = network.join("room");
        let link_c = network.join("room");

        link_a.send(b"hello").await.unwrap();

        assert_eq!(link_b.recv().await.unwrap(), b"hello");
        assert_eq!(link_c.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let network = SimNetwork::new();
        let link_a = network.join("alpha");
        let _link_b = network.join("beta");

        link_a.send(b"only alpha").await.unwrap();
        assert_eq!(network.room_size("alpha"), 1);
        assert_eq!(network.room_size("beta"), 1);
    }

    #[tokio::test]
    async fn test_peer_ids_are_unique_and_ascending() {
        let network = SimNetwork::new();
        let link_a = network.join("room");
        let link_b = network.join("room");
        assert!(link_b.peer_id() > link_a.peer_id());
    }

    #[tokio::test]
    async fn test_leave_removes_member() {
        let network = SimNetwork::new();
        let link_a = network.join("room");
        let link_b = network.join("room");
        assert_eq!(network.room_size("room"), 2);

        link_b.leave();
        assert_eq!(network.room_size("room"), 1);
        assert!(!link_b.is_connected());

        // Sends from departed members fail
        assert!(link_b.send(b"x").await.is_err());
        // Survivors are unaffected
        link_a.send(b"y").await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_leaves_room() {
        let network = SimNetwork::new();
        let link_a = network.join("room");
        {
            let _link_b = network.join("room");
            assert_eq!(network.room_size("room"), 2);
        }
        assert_eq!(network.room_size("room"), 1);
        drop(link_a);
        assert_eq!(network.room_size("room"), 0);
    }
}
