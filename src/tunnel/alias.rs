//! Persisted port → DNS alias mapping for named tunnels.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state_file;
use crate::Result;

/// An alias record created for a port in an earlier run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub hostname: String,
    pub record_id: String,
    pub created_at: DateTime<Utc>,
}

/// JSON file keyed by port, rewritten atomically on every insert.
pub struct AliasStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<u16, AliasEntry>>,
}

impl AliasStore {
    /// Load the store. An unreadable file starts empty; aliases are then
    /// rediscovered through the provider API.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match state_file::read_json(&path) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable alias map: {}", e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u16, AliasEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, port: u16) -> Option<AliasEntry> {
        self.entries().get(&port).cloned()
    }

    pub fn insert(&self, port: u16, entry: AliasEntry) -> Result<()> {
        let mut entries = self.entries();
        entries.insert(port, entry);
        state_file::write_json_atomic(&self.path, &*entries)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(host: &str) -> AliasEntry {
        AliasEntry {
            hostname: host.to_string(),
            record_id: "rec-1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");

        let store = AliasStore::open(&path);
        assert!(store.is_empty());
        store.insert(3000, entry("3000.dev.example.com")).unwrap();

        let reopened = AliasStore::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(
            reopened.get(3000).map(|e| e.hostname),
            Some("3000.dev.example.com".to_string())
        );
        assert!(reopened.get(3001).is_none());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(&path, b"[not a map").unwrap();

        let store = AliasStore::open(&path);
        assert!(store.is_empty());
        store.insert(8080, entry("8080.dev.example.com")).unwrap();
        assert_eq!(AliasStore::open(&path).len(), 1);
    }
}
