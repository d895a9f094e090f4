//! Typed access to the shared `meta` container
//!
//! Standardized keys prevent drift between peers reading the same map.
//! Scalar values are latest-wins registers; the settings-sharing log is
//! a replicated append-only sequence so concurrent shares never clobber
//! each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::convergent::{Container, DocStore, PeerId, Value};

/// Standardized keys of the meta container.
pub mod keys {
    /// The peer id of the client currently designated as the host.
    pub const HOST_ID: &str = "hostId";
    /// The title of the shared history/session.
    pub const HISTORY_TITLE: &str = "historyTitle";
    /// A description of the current focus of the session.
    pub const CURRENT_FOCUS: &str = "currentFocus";
    /// The peer id of the client who currently holds the turn.
    pub const ACTIVE_PLAYER_ID: &str = "activePlayerId";
    /// Whether strict turn-based rules are enforced.
    pub const IS_STRICT_MODE: &str = "isStrictMode";
    /// The append-only log of shared view-settings events.
    pub const SHARED_SETTINGS_LOG: &str = "shared-settings-log";
}

/// Meta entries are single-value records under this field name.
pub(crate) const VALUE_FIELD: &str = "value";

/// One entry in the settings-sharing log.
#[derive(Clone, Debug, PartialEq)]
pub struct SettingsEvent {
    pub sender_id: PeerId,
    pub event_id: String,
    pub timestamp: u64,
    pub settings: Value,
}

impl SettingsEvent {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("senderId".to_string(), Value::int(self.sender_id as i64));
        map.insert("eventId".to_string(), Value::string(self.event_id.clone()));
        map.insert("timestamp".to_string(), Value::int(self.timestamp as i64));
        map.insert("settings".to_string(), self.settings.clone());
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let map = match value {
            Value::Map(m) => m,
            _ => return None,
        };
        Some(Self {
            sender_id: map.get("senderId")?.as_i64()? as PeerId,
            event_id: map.get("eventId")?.as_str()?.to_string(),
            timestamp: map.get("timestamp")?.as_i64()? as u64,
            settings: map.get("settings")?.clone(),
        })
    }
}

/// Strongly-typed view over the meta container.
#[derive(Clone)]
pub struct MetaView {
    store: Arc<DocStore>,
}

impl MetaView {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self { store }
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.store.field(Container::Meta, key, VALUE_FIELD)
    }

    /// Write a meta value, skipping the write when it would not change
    /// anything (observers rely on this idempotence).
    fn set(&self, key: &str, value: Value) {
        if self.get(key).as_ref() == Some(&value) {
            return;
        }
        self.store.transact(|tx| {
            tx.set_field(Container::Meta, key, VALUE_FIELD, value);
        });
    }

    pub fn host_id(&self) -> Option<PeerId> {
        self.get(keys::HOST_ID)?.as_i64().map(|n| n as PeerId)
    }

    pub fn set_host_id(&self, id: PeerId) {
        log::info!("meta: hostId <- {id}");
        self.set(keys::HOST_ID, Value::int(id as i64));
    }

    pub fn history_title(&self) -> Option<String> {
        self.get(keys::HISTORY_TITLE)?.as_str().map(String::from)
    }

    pub fn set_history_title(&self, title: impl Into<String>) {
        self.set(keys::HISTORY_TITLE, Value::string(title.into()));
    }

    pub fn current_focus(&self) -> Option<String> {
        self.get(keys::CURRENT_FOCUS)?.as_str().map(String::from)
    }

    pub fn set_current_focus(&self, focus: impl Into<String>) {
        self.set(keys::CURRENT_FOCUS, Value::string(focus.into()));
    }

    /// The current turn holder, if any. `Null` and absent both mean
    /// nobody holds the turn.
    pub fn active_player_id(&self) -> Option<PeerId> {
        self.get(keys::ACTIVE_PLAYER_ID)?
            .as_i64()
            .map(|n| n as PeerId)
    }

    pub fn set_active_player_id(&self, id: Option<PeerId>) {
        let value = match id {
            Some(id) => Value::int(id as i64),
            None => Value::Null,
        };
        self.set(keys::ACTIVE_PLAYER_ID, value);
    }

    pub fn is_strict_mode(&self) -> bool {
        self.get(keys::IS_STRICT_MODE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn set_is_strict_mode(&self, strict: bool) {
        self.set(keys::IS_STRICT_MODE, Value::bool(strict));
    }

    /// Append a settings-sharing event to the replicated log.
    pub fn share_settings(&self, sender_id: PeerId, settings: Value) -> SettingsEvent {
        let event = SettingsEvent {
            sender_id,
            event_id: Uuid::new_v4().to_string(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            settings,
        };
        self.store.transact(|tx| {
            tx.append(Container::Meta, keys::SHARED_SETTINGS_LOG, event.to_value());
        });
        event
    }

    /// All settings events, in converged log order.
    pub fn settings_events(&self) -> Vec<SettingsEvent> {
        self.store
            .list(Container::Meta, keys::SHARED_SETTINGS_LOG)
            .iter()
            .filter_map(SettingsEvent::from_value)
            .collect()
    }
}
