//! Resume index: which keys a previous run already handled.

use crate::checkpoint::CheckpointStore;
use crate::models::{IdentityKey, Result};
use std::collections::HashSet;
use tracing::info;

/// In-memory set of processed keys, built once per run.
#[derive(Debug, Default)]
pub struct ResumeIndex {
    keys: HashSet<IdentityKey>,
}

impl ResumeIndex {
    /// Union of the keys in the durable log and the marker file.
    pub fn load(store: &CheckpointStore) -> Result<Self> {
        let mut keys: HashSet<IdentityKey> = store.log().scan()?.map(|entry| entry.key).collect();
        let from_log = keys.len();

        let marked = store.marker().load();
        let from_marker = marked.len();
        keys.extend(marked);

        info!(
            from_log,
            from_marker,
            resumed = keys.len(),
            "Loaded resume index"
        );
        Ok(Self { keys })
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a key whose outcome was just appended.
    pub fn insert(&mut self, key: IdentityKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{DurableLog, LogEntry, MarkerFile};
    use crate::models::Outcome;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_load_unions_log_and_marker() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::new(&dir.path().join("log.jsonl"), "score", &["score_global"]);
        log.initialize().unwrap();
        let marker = MarkerFile::new(&dir.path().join("log.txt"));
        let store = CheckpointStore::new(log, marker);

        // Logged but never marked (crash between the two writes).
        store
            .log()
            .append(&LogEntry::new(IdentityKey::new("1"), Outcome::new(), Uuid::new_v4()))
            .unwrap();
        // Marker-only key, e.g. carried over from an older log file.
        std::fs::write(store.marker().path(), "2\n").unwrap();
        store
            .record(&LogEntry::new(IdentityKey::new("1"), Outcome::new(), Uuid::new_v4()))
            .unwrap();

        let mut index = ResumeIndex::load(&store).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains(&IdentityKey::new("1")));
        assert!(index.contains(&IdentityKey::new("2")));
        assert!(!index.contains(&IdentityKey::new("3")));

        assert!(index.insert(IdentityKey::new("3")));
        assert!(!index.insert(IdentityKey::new("3")));
        assert!(index.contains(&IdentityKey::new("3")));
    }

    #[test]
    fn test_load_without_files_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(
            DurableLog::new(&dir.path().join("none.jsonl"), "score", &[]),
            MarkerFile::new(&dir.path().join("none.txt")),
        );
        assert!(ResumeIndex::load(&store).unwrap().is_empty());
    }
}
