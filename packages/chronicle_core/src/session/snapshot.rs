//! Session snapshots
//!
//! Whole-document export/import for backup and transfer. The payload is
//! a self-describing JSON object with exactly three required sections;
//! import validates them all before touching the replica, then replaces
//! the document in one transaction.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convergent::{Container, DocStore, Value};
use crate::timeline::TimelineNode;

use super::meta::VALUE_FIELD;

/// Why a snapshot payload was rejected. Nothing is mutated on failure.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot missing required section '{0}'")]
    MissingSection(&'static str),

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// The palette section: plain string sequences, converted back into
/// replicated sequences on import.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaletteSection {
    #[serde(rename = "affirmedWords", default)]
    pub affirmed_words: Vec<String>,
    #[serde(rename = "bannedWords", default)]
    pub banned_words: Vec<String>,
}

/// A complete exported document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: BTreeMap<String, serde_json::Value>,
    pub nodes: BTreeMap<String, TimelineNode>,
    pub palette: PaletteSection,
}

/// Serialize the current contents of all three containers.
pub fn export_snapshot(store: &DocStore) -> Snapshot {
    let state = store.state();

    let mut meta = BTreeMap::new();
    for (key, entry) in &state.meta.entries {
        if let Some(value) = entry.field(VALUE_FIELD) {
            if let Ok(json) = serde_json::to_value(value) {
                meta.insert(key.clone(), json);
            }
        }
    }
    for (name, elements) in &state.meta.lists {
        if let Ok(json) = serde_json::to_value(elements) {
            meta.insert(name.clone(), json);
        }
    }

    let nodes = state
        .nodes
        .entries
        .iter()
        .filter_map(|(id, entry)| TimelineNode::from_entry(id, entry).map(|n| (id.clone(), n)))
        .collect();

    let string_list = |name: &str| -> Vec<String> {
        state
            .palette
            .lists
            .get(name)
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    Snapshot {
        meta,
        nodes,
        palette: PaletteSection {
            affirmed_words: string_list(super::palette::lists::AFFIRMED_WORDS),
            banned_words: string_list(super::palette::lists::BANNED_WORDS),
        },
    }
}

/// Validate a payload and replace the document with its contents.
/// All-or-nothing: a rejected payload leaves the replica untouched.
pub fn import_snapshot(store: &DocStore, payload: &serde_json::Value) -> Result<(), SnapshotError> {
    for section in ["meta", "nodes", "palette"] {
        if payload.get(section).is_none() {
            return Err(SnapshotError::MissingSection(section));
        }
    }

    let meta: BTreeMap<String, serde_json::Value> =
        serde_json::from_value(payload["meta"].clone())
            .map_err(|e| SnapshotError::Malformed(format!("meta: {e}")))?;
    let nodes: BTreeMap<String, TimelineNode> = serde_json::from_value(payload["nodes"].clone())
        .map_err(|e| SnapshotError::Malformed(format!("nodes: {e}")))?;
    let palette: PaletteSection = serde_json::from_value(payload["palette"].clone())
        .map_err(|e| SnapshotError::Malformed(format!("palette: {e}")))?;

    let state = store.state();
    store.transact(|tx| {
        // Nuke: clear all three containers.
        for container in Container::ALL {
            let current = state.container(container);
            for key in current.entries.keys() {
                tx.remove_key(container, key.clone());
            }
            for (name, elements) in &current.lists {
                let distinct: HashSet<&Value> = elements.iter().collect();
                for element in distinct {
                    let observed = store.append_ids(container, name, element);
                    tx.erase(container, name.clone(), element.clone(), observed);
                }
            }
        }

        // Rehydrate meta: arrays become replicated sequences again,
        // scalars become registers.
        for (key, json) in &meta {
            match json {
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Ok(value) = serde_json::from_value::<Value>(item.clone()) {
                            tx.append(Container::Meta, key.clone(), value);
                        }
                    }
                }
                other => {
                    if let Ok(value) = serde_json::from_value::<Value>(other.clone()) {
                        tx.set_field(Container::Meta, key.clone(), VALUE_FIELD, value);
                    }
                }
            }
        }

        // Rehydrate nodes, trusting the map key over any stale record id.
        for (id, node) in &nodes {
            let mut node = node.clone();
            node.id = id.clone();
            node.write_fields(tx);
        }

        // Rehydrate palette sequences.
        for word in &palette.affirmed_words {
            tx.append(
                Container::Palette,
                super::palette::lists::AFFIRMED_WORDS,
                Value::string(word),
            );
        }
        for word in &palette.banned_words {
            tx.append(
                Container::Palette,
                super::palette::lists::BANNED_WORDS,
                Value::string(word),
            );
        }
    });

    log::info!(
        "imported snapshot: {} node(s), {} meta key(s)",
        nodes.len(),
        meta.len()
    );
    Ok(())
}
