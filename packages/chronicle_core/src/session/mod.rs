//! Session coordination
//!
//! Everything above the replica and the transport: host election, turn
//! passing, typed meta/palette access, snapshots, the recent-sessions
//! collaborator, and the lifecycle wiring that ties a session together.

pub mod election;
pub mod manager;
pub mod meta;
pub mod palette;
pub mod recent;
pub mod snapshot;
pub mod turn;

pub use election::{
    elect, needs_reelection, settle_decision, BootstrapIntent, BootstrapOutcome, ElectionConfig,
    ElectionState, SettleDecision,
};
pub use manager::{Session, SessionConfig};
pub use meta::{keys, MetaView, SettingsEvent};
pub use palette::{lists, PaletteView};
pub use recent::{FileRecentSessions, MemoryRecentSessions, RecentSession, RecentSessions};
pub use snapshot::{export_snapshot, import_snapshot, PaletteSection, Snapshot, SnapshotError};
pub use turn::{next_in_rotation, TurnError, TurnService};
