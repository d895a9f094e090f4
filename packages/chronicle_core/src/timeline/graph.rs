//! Node graph service
//!
//! CRUD over the timeline tree, fractional ordering helpers, and the
//! derived-tag maintenance observer. Every operation commits as one
//! transaction, so observers never see a half-applied node.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::convergent::{Container, DocStore, Value};

use super::node::{fields, tags_value, NodeId, NodeKind, TimelineNode, Tone};
use super::tags::extract_tags;

/// Validation failures from tree operations. Expected under concurrent
/// use (a peer may delete a node someone else is targeting); callers
/// treat these as ordinary outcomes.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),

    #[error("node '{0}' is not a period")]
    NotAPeriod(NodeId),

    #[error("nodes do not share a common, valid parent")]
    MismatchedParent,
}

/// Properties for a new node. Unset order defaults to the wall-clock
/// millisecond count, which sorts creations after existing content.
#[derive(Clone, Debug)]
pub struct NodeDraft {
    pub kind: NodeKind,
    pub title: String,
    pub description: String,
    pub parent_id: Option<NodeId>,
    pub tone: Tone,
    pub is_ghost: bool,
    pub is_bookend: bool,
    pub order: Option<f64>,
}

impl NodeDraft {
    pub fn new(kind: NodeKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            parent_id: None,
            tone: Tone::Light,
            is_ghost: false,
            is_bookend: false,
            order: None,
        }
    }
}

/// A partial update. Only set fields are written, and only when the new
/// value actually differs from the current one.
#[derive(Clone, Debug, Default)]
pub struct NodePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tone: Option<Tone>,
    pub is_ghost: Option<bool>,
    pub is_bookend: Option<bool>,
    pub order: Option<f64>,
    /// `Some(None)` reparents to top level.
    pub parent_id: Option<Option<NodeId>>,
}

impl NodePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }
}

/// API for reading and mutating the node tree of one document.
#[derive(Clone)]
pub struct NodeGraph {
    store: Arc<DocStore>,
}

impl NodeGraph {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self { store }
    }

    /// Create a node with the given properties. Tags are derived from the
    /// description inside the same transaction.
    pub fn add_node(&self, draft: NodeDraft) -> TimelineNode {
        let order = draft.order.unwrap_or_else(now_millis);
        let node = TimelineNode {
            id: Uuid::new_v4().to_string(),
            kind: draft.kind,
            parent_id: draft.parent_id,
            title: draft.title,
            tags: extract_tags(&draft.description),
            description: draft.description,
            tone: draft.tone,
            is_ghost: draft.is_ghost,
            is_bookend: draft.is_bookend,
            order,
        };

        self.store.transact(|tx| node.write_fields(tx));
        log::debug!("added {} node '{}'", node.kind.as_str(), node.id);
        node
    }

    /// Retrieve a node by id.
    pub fn get_node(&self, node_id: &str) -> Option<TimelineNode> {
        let entry = self.store.entry(Container::Nodes, node_id)?;
        TimelineNode::from_entry(node_id, &entry)
    }

    /// All nodes, sorted by order key (ties broken by id so iteration
    /// order is total and identical on every replica).
    pub fn all_nodes(&self) -> Vec<TimelineNode> {
        let state = self.store.container(Container::Nodes);
        let mut nodes: Vec<TimelineNode> = state
            .entries
            .iter()
            .filter_map(|(id, entry)| TimelineNode::from_entry(id, entry))
            .collect();
        nodes.sort_by(|a, b| {
            a.order
                .partial_cmp(&b.order)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    /// Direct children of a node, order-sorted.
    pub fn children_of(&self, node_id: &str) -> Vec<TimelineNode> {
        self.all_nodes()
            .into_iter()
            .filter(|n| n.parent_id.as_deref() == Some(node_id))
            .collect()
    }

    /// Whether a period has any direct children. Non-periods report false.
    pub fn has_children(&self, node_id: &str) -> bool {
        match self.get_node(node_id) {
            Some(node) if node.kind == NodeKind::Period => {
                !self.children_of(node_id).is_empty()
            }
            _ => false,
        }
    }

    /// Update fields of an existing node. A description change re-derives
    /// tags in the same transaction; unchanged values are not rewritten.
    pub fn update_node(&self, node_id: &str, patch: NodePatch) -> Result<(), GraphError> {
        let current = self
            .get_node(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;

        self.store.transact(|tx| {
            if let Some(title) = patch.title {
                if title != current.title {
                    tx.set_field(Container::Nodes, node_id, fields::TITLE, Value::string(title));
                }
            }
            if let Some(description) = patch.description {
                if description != current.description {
                    let tags = extract_tags(&description);
                    tx.set_field(
                        Container::Nodes,
                        node_id,
                        fields::DESCRIPTION,
                        Value::string(description),
                    );
                    if tags != current.tags {
                        tx.set_field(Container::Nodes, node_id, fields::TAGS, tags_value(&tags));
                    }
                }
            }
            if let Some(tone) = patch.tone {
                if tone != current.tone {
                    tx.set_field(
                        Container::Nodes,
                        node_id,
                        fields::TONE,
                        Value::string(tone.as_str()),
                    );
                }
            }
            if let Some(is_ghost) = patch.is_ghost {
                if is_ghost != current.is_ghost {
                    tx.set_field(
                        Container::Nodes,
                        node_id,
                        fields::IS_GHOST,
                        Value::bool(is_ghost),
                    );
                }
            }
            if let Some(is_bookend) = patch.is_bookend {
                if is_bookend != current.is_bookend {
                    tx.set_field(
                        Container::Nodes,
                        node_id,
                        fields::IS_BOOKEND,
                        Value::bool(is_bookend),
                    );
                }
            }
            if let Some(order) = patch.order {
                if order != current.order {
                    tx.set_field(Container::Nodes, node_id, fields::ORDER, Value::float(order));
                }
            }
            if let Some(parent_id) = patch.parent_id {
                if parent_id != current.parent_id {
                    tx.set_field(
                        Container::Nodes,
                        node_id,
                        fields::PARENT_ID,
                        match parent_id {
                            Some(p) => Value::string(p),
                            None => Value::Null,
                        },
                    );
                }
            }
        });
        Ok(())
    }

    /// Delete a node. Deleting a period also deletes its direct children;
    /// deleting an event leaves its scenes in place (orphaned). The
    /// cascade never reaches grandchildren.
    pub fn delete_node(&self, node_id: &str) -> Result<(), GraphError> {
        let node = self
            .get_node(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;

        let mut doomed: Vec<NodeId> = vec![node.id.clone()];
        if node.kind == NodeKind::Period {
            doomed.extend(self.children_of(node_id).into_iter().map(|n| n.id));
        }

        self.store.transact(|tx| {
            for id in &doomed {
                tx.remove_key(Container::Nodes, id.clone());
            }
        });
        log::debug!("deleted {} node(s) starting at '{}'", doomed.len(), node_id);
        Ok(())
    }

    /// Insert a new ghost period midway between two existing periods,
    /// alternating tone from the left neighbor.
    pub fn insert_period_between(
        &self,
        prev_id: &str,
        next_id: &str,
    ) -> Result<TimelineNode, GraphError> {
        let prev = self
            .get_node(prev_id)
            .ok_or_else(|| GraphError::UnknownNode(prev_id.to_string()))?;
        let next = self
            .get_node(next_id)
            .ok_or_else(|| GraphError::UnknownNode(next_id.to_string()))?;
        if prev.kind != NodeKind::Period {
            return Err(GraphError::NotAPeriod(prev.id));
        }
        if next.kind != NodeKind::Period {
            return Err(GraphError::NotAPeriod(next.id));
        }

        let mut draft = NodeDraft::new(NodeKind::Period, "New Period");
        draft.is_ghost = true;
        draft.order = Some((prev.order + next.order) / 2.0);
        draft.tone = prev.tone.opposite();
        Ok(self.add_node(draft))
    }

    /// Insert a new ghost event between two nodes that share a parent
    /// period, inheriting the parent's tone.
    pub fn insert_event_between(
        &self,
        prev_id: &str,
        next_id: &str,
    ) -> Result<TimelineNode, GraphError> {
        let prev = self
            .get_node(prev_id)
            .ok_or_else(|| GraphError::UnknownNode(prev_id.to_string()))?;
        let next = self
            .get_node(next_id)
            .ok_or_else(|| GraphError::UnknownNode(next_id.to_string()))?;

        // The left neighbor is either the parent period itself or a
        // sibling event under it.
        let parent_id = match prev.kind {
            NodeKind::Period => prev.id.clone(),
            _ => prev.parent_id.clone().ok_or(GraphError::MismatchedParent)?,
        };
        let parent = self
            .get_node(&parent_id)
            .ok_or(GraphError::MismatchedParent)?;
        if next.parent_id.as_deref() != Some(parent_id.as_str())
            && next.parent_id.as_deref() != Some(prev.id.as_str())
        {
            return Err(GraphError::MismatchedParent);
        }

        let mut draft = NodeDraft::new(NodeKind::Event, "New Event");
        draft.is_ghost = true;
        draft.parent_id = Some(parent_id);
        draft.order = Some((prev.order + next.order) / 2.0);
        draft.tone = parent.tone;
        Ok(self.add_node(draft))
    }

    /// Append a new ghost event after a period's existing children. The
    /// order lands strictly between the last child and the next top-level
    /// slot, or at `parent.order + 0.5` for a childless period.
    pub fn add_event_to_period(&self, parent_id: &str) -> Result<TimelineNode, GraphError> {
        let parent = self
            .get_node(parent_id)
            .ok_or_else(|| GraphError::UnknownNode(parent_id.to_string()))?;
        if parent.kind != NodeKind::Period {
            return Err(GraphError::NotAPeriod(parent.id));
        }

        let events: Vec<TimelineNode> = self
            .children_of(parent_id)
            .into_iter()
            .filter(|n| n.kind == NodeKind::Event)
            .collect();

        let order = match events.last() {
            Some(last) => (last.order + parent.order + 1.0) / 2.0,
            None => parent.order + 0.5,
        };

        let mut draft = NodeDraft::new(NodeKind::Event, "New Event");
        draft.is_ghost = true;
        draft.parent_id = Some(parent.id);
        draft.order = Some(order);
        draft.tone = parent.tone;
        Ok(self.add_node(draft))
    }
}

/// Keep cached tags in sync with descriptions, for changes from any
/// peer. Writes only when the derived value differs from the stored one,
/// so the loop terminates after a single corrective transaction.
pub fn spawn_tag_resync(store: Arc<DocStore>) -> JoinHandle<()> {
    let mut changes = store.changes();
    tokio::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("tag resync lagged {n} change set(s)");
                    continue;
                }
                Err(_) => break,
            };
            for (container, key) in &change.entries {
                if *container != Container::Nodes {
                    continue;
                }
                let node = store
                    .entry(Container::Nodes, key)
                    .and_then(|e| TimelineNode::from_entry(key, &e));
                if let Some(node) = node {
                    let derived = extract_tags(&node.description);
                    if derived != node.tags {
                        log::debug!("resyncing tags for node '{key}'");
                        store.transact(|tx| {
                            tx.set_field(
                                Container::Nodes,
                                key.clone(),
                                fields::TAGS,
                                tags_value(&derived),
                            );
                        });
                    }
                }
            }
        }
    })
}

fn now_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> NodeGraph {
        NodeGraph::new(Arc::new(DocStore::new(1)))
    }

    fn period(g: &NodeGraph, title: &str, order: f64, tone: Tone) -> TimelineNode {
        let mut draft = NodeDraft::new(NodeKind::Period, title);
        draft.order = Some(order);
        draft.tone = tone;
        g.add_node(draft)
    }

    #[test]
    fn test_add_and_get_node() {
        let g = graph();
        let mut draft = NodeDraft::new(NodeKind::Period, "First Age");
        draft.description = "the @Guild ascends".into();
        draft.order = Some(0.0);
        let node = g.add_node(draft);

        let loaded = g.get_node(&node.id).unwrap();
        assert_eq!(loaded.title, "First Age");
        assert_eq!(loaded.tags, vec!["@Guild"]);
    }

    #[test]
    fn test_update_unknown_node_fails() {
        let g = graph();
        let err = g.update_node("missing", NodePatch::title("x")).unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("missing".into()));
    }

    #[test]
    fn test_description_update_rederives_tags() {
        let g = graph();
        let node = g.add_node(NodeDraft::new(NodeKind::Event, "E"));

        g.update_node(&node.id, NodePatch::description("enter @dragon"))
            .unwrap();
        assert_eq!(g.get_node(&node.id).unwrap().tags, vec!["@dragon"]);

        g.update_node(&node.id, NodePatch::description("no more tags"))
            .unwrap();
        assert!(g.get_node(&node.id).unwrap().tags.is_empty());
    }

    #[test]
    fn test_same_description_is_a_noop() {
        let g = graph();
        let mut draft = NodeDraft::new(NodeKind::Event, "E");
        draft.description = "stable @text".into();
        let node = g.add_node(draft);

        let mut outbound = g.store.outbound();
        // Drain nothing: subscription starts after the add
        g.update_node(&node.id, NodePatch::description("stable @text"))
            .unwrap();
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn test_delete_period_cascades_one_level() {
        let g = graph();
        let p = period(&g, "P", 0.0, Tone::Light);
        let e = g.add_event_to_period(&p.id).unwrap();
        let mut scene_draft = NodeDraft::new(NodeKind::Scene, "S");
        scene_draft.parent_id = Some(e.id.clone());
        scene_draft.order = Some(e.order + 0.1);
        let s = g.add_node(scene_draft);

        g.delete_node(&p.id).unwrap();

        // Period and its event are gone; the grandchild scene is orphaned
        assert!(g.get_node(&p.id).is_none());
        assert!(g.get_node(&e.id).is_none());
        let orphan = g.get_node(&s.id).unwrap();
        assert_eq!(orphan.parent_id.as_deref(), Some(e.id.as_str()));
    }

    #[test]
    fn test_delete_event_leaves_scenes() {
        let g = graph();
        let p = period(&g, "P", 0.0, Tone::Light);
        let e = g.add_event_to_period(&p.id).unwrap();
        let mut scene_draft = NodeDraft::new(NodeKind::Scene, "S");
        scene_draft.parent_id = Some(e.id.clone());
        let s = g.add_node(scene_draft);

        g.delete_node(&e.id).unwrap();
        assert!(g.get_node(&e.id).is_none());
        assert!(g.get_node(&s.id).is_some());
    }

    #[test]
    fn test_insert_period_between_midpoint_and_tone() {
        let g = graph();
        let a = period(&g, "A", 1.0, Tone::Light);
        let b = period(&g, "B", 2.0, Tone::Dark);

        let mid = g.insert_period_between(&a.id, &b.id).unwrap();
        assert_eq!(mid.order, 1.5);
        assert_eq!(mid.tone, Tone::Dark);
        assert!(mid.is_ghost);

        // Strict betweenness holds on repeated insertion
        let quarter = g.insert_period_between(&a.id, &mid.id).unwrap();
        assert_eq!(quarter.order, 1.25);
    }

    #[test]
    fn test_insert_period_rejects_non_periods() {
        let g = graph();
        let p = period(&g, "P", 0.0, Tone::Light);
        let e = g.add_event_to_period(&p.id).unwrap();
        let err = g.insert_period_between(&p.id, &e.id).unwrap_err();
        assert_eq!(err, GraphError::NotAPeriod(e.id));
    }

    #[test]
    fn test_add_event_ordering() {
        let g = graph();
        let p = period(&g, "P", 2.0, Tone::Dark);

        let first = g.add_event_to_period(&p.id).unwrap();
        assert_eq!(first.order, 2.5);
        assert_eq!(first.tone, Tone::Dark);

        // Next event lands between the last child and the next period slot
        let second = g.add_event_to_period(&p.id).unwrap();
        assert_eq!(second.order, (2.5 + 3.0) / 2.0);
        assert!(second.order > first.order && second.order < 3.0);
    }

    #[test]
    fn test_insert_event_between_infers_parent() {
        let g = graph();
        let p = period(&g, "P", 1.0, Tone::Light);
        let e1 = g.add_event_to_period(&p.id).unwrap();
        let e2 = g.add_event_to_period(&p.id).unwrap();

        let mid = g.insert_event_between(&e1.id, &e2.id).unwrap();
        assert_eq!(mid.parent_id.as_deref(), Some(p.id.as_str()));
        assert_eq!(mid.order, (e1.order + e2.order) / 2.0);

        // Period as the left neighbor also works
        let lead = g.insert_event_between(&p.id, &e1.id).unwrap();
        assert_eq!(lead.parent_id.as_deref(), Some(p.id.as_str()));
        assert!(lead.order > p.order && lead.order < e1.order);
    }

    #[test]
    fn test_insert_event_between_mismatched_parents() {
        let g = graph();
        let p1 = period(&g, "P1", 1.0, Tone::Light);
        let p2 = period(&g, "P2", 2.0, Tone::Dark);
        let e1 = g.add_event_to_period(&p1.id).unwrap();
        let e2 = g.add_event_to_period(&p2.id).unwrap();

        let err = g.insert_event_between(&e1.id, &e2.id).unwrap_err();
        assert_eq!(err, GraphError::MismatchedParent);
    }

    #[test]
    fn test_has_children_only_for_periods() {
        let g = graph();
        let p = period(&g, "P", 0.0, Tone::Light);
        assert!(!g.has_children(&p.id));

        let e = g.add_event_to_period(&p.id).unwrap();
        assert!(g.has_children(&p.id));
        // Events report false even with scene children
        let mut scene = NodeDraft::new(NodeKind::Scene, "S");
        scene.parent_id = Some(e.id.clone());
        g.add_node(scene);
        assert!(!g.has_children(&e.id));
    }

    #[tokio::test]
    async fn test_tag_resync_repairs_remote_descriptions() {
        let local = Arc::new(DocStore::new(1));
        let g = NodeGraph::new(Arc::clone(&local));
        let resync = spawn_tag_resync(Arc::clone(&local));

        // A remote peer writes a description without refreshing the cache
        let remote = DocStore::new(2);
        let frame = remote.transact(|tx| {
            tx.set_field(Container::Nodes, "n1", fields::KIND, Value::string("event"));
            tx.set_field(
                Container::Nodes,
                "n1",
                fields::DESCRIPTION,
                Value::string("hello @world"),
            );
        });
        local.apply_remote(frame);

        // Let the observer run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let node = g.get_node("n1").unwrap();
        assert_eq!(node.tags, vec!["@world"]);
        resync.abort();
    }
}
