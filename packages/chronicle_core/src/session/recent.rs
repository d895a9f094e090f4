//! Recently joined sessions
//!
//! A small local collaborator, not replicated state: the core records an
//! access whenever a session is joined or renamed, and the lobby lists
//! the result. Capped at ten entries, most recent first.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of remembered sessions.
const MAX_RECENT: usize = 10;

/// One remembered session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentSession {
    pub id: String,
    pub name: String,
    pub last_accessed: DateTime<Utc>,
}

/// Storage seam for the recent-sessions list. The core only records and
/// lists; the storage format belongs to the implementor.
pub trait RecentSessions: Send + Sync {
    /// Record (or refresh) an access to a session.
    fn record_access(&self, room_id: &str, name: &str);

    /// All remembered sessions, most recent first.
    fn list(&self) -> Vec<RecentSession>;

    /// Forget a session.
    fn remove(&self, room_id: &str);
}

fn upsert(entries: &mut Vec<RecentSession>, room_id: &str, name: &str) {
    entries.retain(|s| s.id != room_id);
    entries.insert(
        0,
        RecentSession {
            id: room_id.to_string(),
            name: name.to_string(),
            last_accessed: Utc::now(),
        },
    );
    entries.truncate(MAX_RECENT);
}

/// In-memory implementation, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryRecentSessions {
    entries: Mutex<Vec<RecentSession>>,
}

impl MemoryRecentSessions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecentSessions for MemoryRecentSessions {
    fn record_access(&self, room_id: &str, name: &str) {
        upsert(
            &mut self.entries.lock().expect("recents lock poisoned"),
            room_id,
            name,
        );
    }

    fn list(&self) -> Vec<RecentSession> {
        self.entries.lock().expect("recents lock poisoned").clone()
    }

    fn remove(&self, room_id: &str) {
        self.entries
            .lock()
            .expect("recents lock poisoned")
            .retain(|s| s.id != room_id);
    }
}

/// JSON-file implementation used by the CLI. Load/save failures are
/// logged and treated as an empty list; this cache is never worth
/// failing a session over.
pub struct FileRecentSessions {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRecentSessions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Vec<RecentSession> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("unreadable recent-sessions file, starting fresh: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    fn save(&self, entries: &[RecentSession]) {
        let json = match serde_json::to_string_pretty(entries) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("could not serialize recent sessions: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            log::warn!("could not persist recent sessions: {e}");
        }
    }
}

impl RecentSessions for FileRecentSessions {
    fn record_access(&self, room_id: &str, name: &str) {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let mut entries = self.load();
        upsert(&mut entries, room_id, name);
        self.save(&entries);
    }

    fn list(&self) -> Vec<RecentSession> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        self.load()
    }

    fn remove(&self, room_id: &str) {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let mut entries = self.load();
        entries.retain(|s| s.id != room_id);
        self.save(&entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_first_and_dedup() {
        let recents = MemoryRecentSessions::new();
        recents.record_access("room-a", "Alpha");
        recents.record_access("room-b", "Beta");
        recents.record_access("room-a", "Alpha Renamed");

        let list = recents.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "room-a");
        assert_eq!(list[0].name, "Alpha Renamed");
        assert_eq!(list[1].id, "room-b");
    }

    #[test]
    fn test_capped_at_ten() {
        let recents = MemoryRecentSessions::new();
        for i in 0..15 {
            recents.record_access(&format!("room-{i}"), "x");
        }
        let list = recents.list();
        assert_eq!(list.len(), 10);
        assert_eq!(list[0].id, "room-14");
        assert_eq!(list[9].id, "room-5");
    }

    #[test]
    fn test_remove() {
        let recents = MemoryRecentSessions::new();
        recents.record_access("room-a", "Alpha");
        recents.record_access("room-b", "Beta");
        recents.remove("room-a");
        let list = recents.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "room-b");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recents.json");

        let recents = FileRecentSessions::new(&path);
        recents.record_access("room-a", "Alpha");
        recents.record_access("room-b", "Beta");

        // A fresh handle over the same file sees the same list
        let reopened = FileRecentSessions::new(&path);
        let list = reopened.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "room-b");
    }

    #[test]
    fn test_file_store_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recents.json");
        std::fs::write(&path, "not json at all").unwrap();

        let recents = FileRecentSessions::new(&path);
        assert!(recents.list().is_empty());
        recents.record_access("room-a", "Alpha");
        assert_eq!(recents.list().len(), 1);
    }
}
