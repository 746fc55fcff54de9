//! In-memory store.
//!
//! Serves two roles: the fallback tier the snapshot cache degrades to
//! when SQLite writes fail (e.g. storage quota), and a test double for
//! the sync core.  Never fails.

use std::collections::HashMap;
use std::sync::Mutex;

use medley_shared::{CachedSnapshot, StoredMetadata};

use crate::error::Result;
use crate::traits::{MetadataStore, SnapshotStore};

#[derive(Default)]
pub struct MemoryStore {
    metadata: Mutex<HashMap<(String, String), StoredMetadata>>,
    snapshots: Mutex<HashMap<String, CachedSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryStore {
    fn get(&self, scope: &str, sha256: &str) -> Result<Option<StoredMetadata>> {
        let map = self.metadata.lock().unwrap_or_else(|p| p.into_inner());
        Ok(map.get(&(scope.to_string(), sha256.to_string())).cloned())
    }

    fn put(&self, scope: &str, sha256: &str, metadata: &StoredMetadata) -> Result<()> {
        let mut map = self.metadata.lock().unwrap_or_else(|p| p.into_inner());
        let key = (scope.to_string(), sha256.to_string());
        if metadata.is_empty() {
            map.remove(&key);
        } else {
            map.insert(key, metadata.clone());
        }
        Ok(())
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, server_url: &str) -> Result<Option<CachedSnapshot>> {
        let map = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
        Ok(map.get(server_url).cloned())
    }

    fn persist(&self, server_url: &str, snapshot: &CachedSnapshot) -> Result<()> {
        let mut map = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(server_url.to_string(), snapshot.clone());
        Ok(())
    }
}
