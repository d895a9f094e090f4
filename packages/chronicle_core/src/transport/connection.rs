//! Transport trait definitions and wire types
//!
//! Defines the abstract room-broadcast interface that the in-process
//! simulator and future real transports (WebRTC, TCP) conform to, plus
//! the messages peers exchange inside a room.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::convergent::{DeltaFrame, Horizon, PeerId};

/// An opaque identifier naming a shared document's rendezvous room.
pub type RoomId = String;

/// Errors from the transport boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Disconnected from room")]
    Disconnected,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Periodic liveness announcement carrying the presence payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceBeacon {
    pub peer_id: PeerId,
    pub display_name: String,
}

/// Messages exchanged among the members of a room.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireMessage {
    /// One committed transaction's operations.
    Delta(DeltaFrame),
    /// Heartbeat presence announcement.
    Presence(PresenceBeacon),
    /// "Send me what I haven't seen" — broadcast by joining peers; any
    /// member replies with a Delta of the operations past the horizon.
    SyncRequest { peer_id: PeerId, horizon: Horizon },
    /// Courtesy notice on orderly departure. Silent peers are caught by
    /// the liveness window instead.
    Leave { peer_id: PeerId },
}

/// Serialize a value to CBOR bytes.
pub(crate) fn cbor_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
pub(crate) fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(data).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// A live membership in a room: fire-and-forget broadcast out, a stream
/// of raw frames in. No request/response; convergence is carried by the
/// payloads themselves.
#[async_trait]
pub trait RoomLink: Send + Sync {
    /// This process's stable numeric identity for the session lifetime.
    fn peer_id(&self) -> PeerId;

    /// The room this link is joined to.
    fn room_id(&self) -> &RoomId;

    /// Broadcast bytes to all other members of the room.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next inbound bytes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Leave the room, releasing the identity.
    fn leave(&self);

    /// Check whether the link is still joined.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergent::{Container, DocStore, Value};

    #[test]
    fn test_wire_message_cbor_round_trip() {
        let doc = DocStore::new(7);
        let frame = doc.transact(|tx| {
            tx.set_field(Container::Nodes, "n1", "title", Value::string("Golden Age"));
            tx.set_field(Container::Nodes, "n1", "order", Value::float(1.5));
        });

        let msg = WireMessage::Delta(frame);
        let bytes = cbor_serialize(&msg).unwrap();
        let restored: WireMessage = cbor_deserialize(&bytes).unwrap();

        match restored {
            WireMessage::Delta(f) => {
                assert_eq!(f.ops.len(), 2);
                assert_eq!(f.ops[0].author, 7);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_presence_beacon_round_trip() {
        let msg = WireMessage::Presence(PresenceBeacon {
            peer_id: 3,
            display_name: "dana".into(),
        });
        let bytes = cbor_serialize(&msg).unwrap();
        let restored: WireMessage = cbor_deserialize(&bytes).unwrap();
        match restored {
            WireMessage::Presence(b) => {
                assert_eq!(b.peer_id, 3);
                assert_eq!(b.display_name, "dana");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
