//! Room membership protocol
//!
//! A RoomHandle layers the wire protocol over a raw RoomLink: it decodes
//! inbound CBOR into WireMessages, maintains the live roster from
//! presence beacons and leave notices, runs the outbound heartbeat, and
//! hands document traffic (deltas, sync requests) to subscribers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::convergent::PeerId;

use super::connection::{
    cbor_deserialize, cbor_serialize, PresenceBeacon, RoomId, RoomLink, TransportError,
    WireMessage,
};
use super::presence::{PeerChange, Roster};

/// Heartbeat cadence and the window after which a silent peer is
/// considered gone.
#[derive(Clone, Copy, Debug)]
pub struct PresenceConfig {
    pub heartbeat: Duration,
    pub liveness_window: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(1),
            liveness_window: Duration::from_secs(4),
        }
    }
}

/// A live, protocol-aware membership in a room.
///
/// Returns `Arc<Self>` because the receive and heartbeat loops hold
/// references.
pub struct RoomHandle {
    link: Arc<dyn RoomLink>,
    display_name: String,
    roster: Arc<Roster>,
    incoming_tx: broadcast::Sender<WireMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RoomHandle {
    /// Join the protocol layer onto an established link and start its
    /// background loops.
    pub fn start(
        link: Arc<dyn RoomLink>,
        display_name: impl Into<String>,
        config: PresenceConfig,
    ) -> Arc<Self> {
        let display_name = display_name.into();
        let roster = Arc::new(Roster::new());
        let (incoming_tx, _) = broadcast::channel(256);

        let my_beacon = PresenceBeacon {
            peer_id: link.peer_id(),
            display_name: display_name.clone(),
        };
        roster.observe(&my_beacon);

        let handle = Arc::new(Self {
            link: Arc::clone(&link),
            display_name,
            roster: Arc::clone(&roster),
            incoming_tx: incoming_tx.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        // Receive loop: decode, route presence to the roster, forward
        // document traffic to subscribers.
        let recv_link = Arc::clone(&link);
        let recv_roster = Arc::clone(&roster);
        let recv_task = tokio::spawn(async move {
            loop {
                match recv_link.recv().await {
                    Ok(data) => match cbor_deserialize::<WireMessage>(&data) {
                        Ok(WireMessage::Presence(beacon)) => recv_roster.observe(&beacon),
                        Ok(WireMessage::Leave { peer_id }) => recv_roster.remove(peer_id),
                        Ok(other) => {
                            let _ = incoming_tx.send(other);
                        }
                        Err(e) => {
                            log::warn!("failed to decode wire message: {e}");
                        }
                    },
                    Err(TransportError::Disconnected) => break,
                    Err(e) => {
                        log::warn!("recv error, closing room loop: {e}");
                        break;
                    }
                }
            }
        });

        // Heartbeat loop: announce ourselves on a fixed cadence.
        let beat_link = Arc::clone(&link);
        let beat_roster = Arc::clone(&roster);
        let beat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.heartbeat);
            loop {
                ticker.tick().await;
                beat_roster.observe(&my_beacon);
                let bytes = match cbor_serialize(&WireMessage::Presence(my_beacon.clone())) {
                    Ok(b) => b,
                    Err(_) => break,
                };
                if beat_link.send(&bytes).await.is_err() {
                    break;
                }
            }
        });

        // Prune loop: expire peers whose beacons stopped arriving.
        let prune_roster = Arc::clone(&roster);
        let my_id = link.peer_id();
        let prune_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.liveness_window / 2);
            loop {
                ticker.tick().await;
                prune_roster.prune(config.liveness_window, my_id);
            }
        });

        handle
            .tasks
            .lock()
            .expect("task list poisoned")
            .extend([recv_task, beat_task, prune_task]);
        handle
    }

    /// This peer's stable numeric identity.
    pub fn peer_id(&self) -> PeerId {
        self.link.peer_id()
    }

    pub fn room_id(&self) -> &RoomId {
        self.link.room_id()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The live roster (includes ourselves).
    pub fn roster(&self) -> Arc<Roster> {
        Arc::clone(&self.roster)
    }

    /// Subscribe to roster membership changes.
    pub fn peer_changes(&self) -> broadcast::Receiver<PeerChange> {
        self.roster.changes()
    }

    /// Subscribe to inbound document traffic (deltas, sync requests).
    pub fn incoming(&self) -> broadcast::Receiver<WireMessage> {
        self.incoming_tx.subscribe()
    }

    /// Fire-and-forget broadcast to all other members.
    pub async fn broadcast(&self, message: &WireMessage) -> Result<(), TransportError> {
        let bytes = cbor_serialize(message)?;
        self.link.send(&bytes).await
    }

    /// Announce departure and tear the membership down.
    pub async fn leave(&self) {
        let notice = WireMessage::Leave {
            peer_id: self.peer_id(),
        };
        if let Ok(bytes) = cbor_serialize(&notice) {
            let _ = self.link.send(&bytes).await;
        }
        self.link.leave();
        for task in self.tasks.lock().expect("task list poisoned").drain(..) {
            task.abort();
        }
    }
}
