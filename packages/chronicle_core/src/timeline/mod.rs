//! Timeline node tree
//!
//! The document's domain model: periods, events, and scenes with
//! fractional sibling ordering and tag projection from descriptions.

mod graph;
mod node;
mod tags;

pub use graph::{spawn_tag_resync, GraphError, NodeDraft, NodeGraph, NodePatch};
pub use node::{fields, tags_value, NodeId, NodeKind, TimelineNode, Tone};
pub use tags::extract_tags;
