//! Peer transport and presence
//!
//! Broadcast-only room membership: no request/response, no ordering
//! guarantees across peers, eventual agreement on who is reachable.

pub mod connection;
pub mod presence;
pub mod room;
pub mod sim;

pub use connection::{PresenceBeacon, RoomId, RoomLink, TransportError, WireMessage};
pub use presence::{PeerChange, PresenceInfo, Roster};
pub use room::{PresenceConfig, RoomHandle};
pub use sim::{SimNetwork, SimRoomLink};
