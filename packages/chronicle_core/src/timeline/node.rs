//! Timeline node model
//!
//! Nodes form the tree of the shared document: periods at the top level,
//! events inside periods, scenes inside events. Position among siblings
//! is a fractional order key, so inserting between two nodes never
//! renumbers the rest.

use serde::{Deserialize, Serialize};

use crate::convergent::{EntryState, Transaction, Value};
use crate::convergent::Container;

/// Stable unique identifier of a node (uuid string).
pub type NodeId = String;

/// Field names of a node entry in the store.
pub mod fields {
    pub const KIND: &str = "type";
    pub const PARENT_ID: &str = "parentId";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const TONE: &str = "tone";
    pub const IS_GHOST: &str = "isGhost";
    pub const IS_BOOKEND: &str = "isBookend";
    pub const ORDER: &str = "order";
    pub const TAGS: &str = "tags";
}

/// The three levels of the timeline tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Period,
    Event,
    Scene,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Period => "period",
            NodeKind::Event => "event",
            NodeKind::Scene => "scene",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "period" => Some(NodeKind::Period),
            "event" => Some(NodeKind::Event),
            "scene" => Some(NodeKind::Scene),
            _ => None,
        }
    }
}

/// Narrative tone of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Light,
    Dark,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Light => "light",
            Tone::Dark => "dark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Tone::Light),
            "dark" => Some(Tone::Dark),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Tone {
        match self {
            Tone::Light => Tone::Dark,
            Tone::Dark => Tone::Light,
        }
    }
}

/// A materialized timeline node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub parent_id: Option<NodeId>,
    pub title: String,
    pub description: String,
    pub tone: Tone,
    pub is_ghost: bool,
    pub is_bookend: bool,
    pub order: f64,
    /// Cached projection of the `@tokens` in `description`. Re-derived on
    /// every description change; never edited directly.
    pub tags: Vec<String>,
}

impl TimelineNode {
    /// Reconstruct a node from its materialized entry. Returns None when
    /// the entry has no recognizable kind.
    pub fn from_entry(id: &str, entry: &EntryState) -> Option<Self> {
        let kind = entry
            .field(fields::KIND)
            .and_then(Value::as_str)
            .and_then(NodeKind::parse)?;

        let parent_id = match entry.field(fields::PARENT_ID) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        let tags = match entry.field(fields::TAGS) {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            id: id.to_string(),
            kind,
            parent_id,
            title: entry
                .field(fields::TITLE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: entry
                .field(fields::DESCRIPTION)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tone: entry
                .field(fields::TONE)
                .and_then(Value::as_str)
                .and_then(Tone::parse)
                .unwrap_or(Tone::Light),
            is_ghost: entry
                .field(fields::IS_GHOST)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            is_bookend: entry
                .field(fields::IS_BOOKEND)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            order: entry
                .field(fields::ORDER)
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            tags,
        })
    }

    /// Stage every field of this node into a transaction.
    pub fn write_fields(&self, tx: &mut Transaction) {
        let key = self.id.as_str();
        tx.set_field(
            Container::Nodes,
            key,
            fields::KIND,
            Value::string(self.kind.as_str()),
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::PARENT_ID,
            match &self.parent_id {
                Some(p) => Value::string(p.clone()),
                None => Value::Null,
            },
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::TITLE,
            Value::string(self.title.clone()),
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::DESCRIPTION,
            Value::string(self.description.clone()),
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::TONE,
            Value::string(self.tone.as_str()),
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::IS_GHOST,
            Value::bool(self.is_ghost),
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::IS_BOOKEND,
            Value::bool(self.is_bookend),
        );
        tx.set_field(
            Container::Nodes,
            key,
            fields::ORDER,
            Value::float(self.order),
        );
        tx.set_field(Container::Nodes, key, fields::TAGS, tags_value(&self.tags));
    }
}

/// Encode a tag list as a store value.
pub fn tags_value(tags: &[String]) -> Value {
    Value::List(tags.iter().map(|t| Value::string(t.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergent::DocStore;

    #[test]
    fn test_round_trip_through_store_fields() {
        let node = TimelineNode {
            id: "n1".into(),
            kind: NodeKind::Event,
            parent_id: Some("p1".into()),
            title: "The Betrayal".into(),
            description: "in which @Atreides falls".into(),
            tone: Tone::Dark,
            is_ghost: true,
            is_bookend: false,
            order: 1.5,
            tags: vec!["@Atreides".into()],
        };

        let doc = DocStore::new(1);
        doc.transact(|tx| node.write_fields(tx));

        let entry = doc.entry(Container::Nodes, "n1").unwrap();
        let restored = TimelineNode::from_entry("n1", &entry).unwrap();
        assert_eq!(restored, node);
    }

    #[test]
    fn test_serde_uses_original_field_names() {
        let node = TimelineNode {
            id: "n1".into(),
            kind: NodeKind::Period,
            parent_id: None,
            title: "Start".into(),
            description: String::new(),
            tone: Tone::Light,
            is_ghost: false,
            is_bookend: true,
            order: 0.0,
            tags: Vec::new(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "period");
        assert_eq!(json["parentId"], serde_json::Value::Null);
        assert_eq!(json["isBookend"], true);
        assert_eq!(json["tone"], "light");
    }

    #[test]
    fn test_tone_alternation() {
        assert_eq!(Tone::Light.opposite(), Tone::Dark);
        assert_eq!(Tone::Dark.opposite(), Tone::Light);
    }
}
