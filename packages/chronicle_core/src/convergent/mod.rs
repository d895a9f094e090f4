//! Convergent Document System
//!
//! Op-based replication for the shared timeline document: every change
//! is an operation in some peer's stream, horizons capture causal
//! context, and materialization resolves concurrent writes
//! deterministically on every replica.

mod horizon;
mod operation;
mod store;

pub use horizon::{Horizon, PeerId, SeqNum};
pub use operation::{Container, DeltaFrame, Mutation, OpEnvelope, OpId, Value};
pub use store::{
    ChangeOrigin, ChangeSet, ContainerState, DocState, DocStore, EntryState, Transaction,
};
