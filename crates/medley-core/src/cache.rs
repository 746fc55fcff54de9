//! Snapshot cache.
//!
//! Persists a bounded, sanitized projection of each server's last-known
//! listing so the UI has something to show before the first fetch
//! completes (or when no signer is connected).  Writes are idle-scheduled
//! and debounced per server; a persistence failure flips the cache into a
//! reduced-capacity mode for the rest of the session and routes the write
//! to the in-memory fallback tier.  The cache is never a correctness
//! dependency.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use medley_shared::constants::{
    PERSIST_DEBOUNCE_MS, SNAPSHOT_CACHE_CAP, SNAPSHOT_CACHE_EMERGENCY_CAP,
};
use medley_shared::{now_ts, Blob, CachedBlob, CachedSnapshot};
use medley_store::{MemoryStore, SnapshotStore};

use crate::idle::{BackgroundScheduler, TaskHandle};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum blobs persisted per server.
    pub cap: usize,
    /// Cap applied after any persistence failure.
    pub emergency_cap: usize,
    /// Debounce window for writes to the same server.
    pub debounce: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cap: SNAPSHOT_CACHE_CAP,
            emergency_cap: SNAPSHOT_CACHE_EMERGENCY_CAP,
            debounce: Duration::from_millis(PERSIST_DEBOUNCE_MS),
        }
    }
}

pub struct SnapshotCache {
    primary: Arc<dyn SnapshotStore>,
    fallback: Arc<MemoryStore>,
    scheduler: Arc<dyn BackgroundScheduler>,
    config: CacheConfig,
    /// Pending debounced writes, one slot per server.
    pending: Mutex<HashMap<String, TaskHandle>>,
    /// Fingerprint of the last persisted listing per server, to skip
    /// writes when nothing changed.
    fingerprints: Mutex<HashMap<String, u64>>,
    degraded: Arc<AtomicBool>,
}

impl SnapshotCache {
    pub fn new(
        primary: Arc<dyn SnapshotStore>,
        scheduler: Arc<dyn BackgroundScheduler>,
        config: CacheConfig,
    ) -> Self {
        Self {
            primary,
            fallback: Arc::new(MemoryStore::new()),
            scheduler,
            config,
            pending: Mutex::new(HashMap::new()),
            fingerprints: Mutex::new(HashMap::new()),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read the last persisted listing for a server.  Errors and
    /// malformed payloads read as a miss.
    pub fn load(&self, server_url: &str) -> Option<CachedSnapshot> {
        match self.primary.load(server_url) {
            Ok(Some(snapshot)) => return Some(snapshot),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(server = %server_url, error = %e, "snapshot cache read failed");
            }
        }
        // Writes that degraded to the fallback tier are still readable.
        self.fallback.load(server_url).ok().flatten()
    }

    /// Schedule a sanitized write of this server's listing.  Fire and
    /// forget: a newer call for the same server cancels a not-yet-run
    /// schedule, and an unchanged listing is skipped entirely.
    pub fn persist(&self, server_url: &str, blobs: &[Blob]) {
        let cap = if self.degraded.load(Ordering::SeqCst) {
            self.config.emergency_cap
        } else {
            self.config.cap
        };
        let sanitized: Vec<CachedBlob> = blobs.iter().take(cap).map(CachedBlob::from).collect();

        let fingerprint = fingerprint_of(&sanitized);
        {
            let mut fingerprints = self.fingerprints.lock().unwrap_or_else(|p| p.into_inner());
            if fingerprints.get(server_url) == Some(&fingerprint) {
                return;
            }
            fingerprints.insert(server_url.to_string(), fingerprint);
        }

        let snapshot = CachedSnapshot {
            blobs: sanitized,
            updated_at: now_ts(),
        };
        let primary = Arc::clone(&self.primary);
        let fallback = Arc::clone(&self.fallback);
        let degraded = Arc::clone(&self.degraded);
        let url = server_url.to_string();

        let handle = self.scheduler.schedule(
            self.config.debounce,
            Box::new(move || write_now(&*primary, &fallback, &degraded, &url, &snapshot)),
        );

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = pending.insert(server_url.to_string(), handle) {
            previous.cancel();
        }
    }

    /// Write without scheduling.  Used at shutdown and in tests.
    pub fn persist_now(&self, server_url: &str, blobs: &[Blob]) {
        let cap = if self.degraded.load(Ordering::SeqCst) {
            self.config.emergency_cap
        } else {
            self.config.cap
        };
        let snapshot = CachedSnapshot {
            blobs: blobs.iter().take(cap).map(CachedBlob::from).collect(),
            updated_at: now_ts(),
        };
        write_now(
            &*self.primary,
            &self.fallback,
            &self.degraded,
            server_url,
            &snapshot,
        );
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

fn write_now(
    primary: &dyn SnapshotStore,
    fallback: &MemoryStore,
    degraded: &AtomicBool,
    server_url: &str,
    snapshot: &CachedSnapshot,
) {
    if let Err(e) = primary.persist(server_url, snapshot) {
        // Quota or I/O trouble: shrink future writes and keep this one
        // in memory.  Fallback failures are swallowed outright.
        degraded.store(true, Ordering::SeqCst);
        tracing::warn!(server = %server_url, error = %e, "snapshot persist failed, using fallback");
        let _ = fallback.persist(server_url, snapshot);
    }
}

fn fingerprint_of(blobs: &[CachedBlob]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for blob in blobs {
        blob.sha256.hash(&mut hasher);
        blob.uploaded.hash(&mut hasher);
        blob.name.hash(&mut hasher);
        blob.mime_type.hash(&mut hasher);
    }
    blobs.len().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use medley_shared::ServerKind;
    use medley_store::StoreError;

    use super::*;
    use crate::idle::TimerScheduler;

    fn blob(n: u8) -> Blob {
        Blob {
            sha256: format!("{n:02x}").repeat(32),
            size: Some(n as u64),
            mime_type: Some("image/png".into()),
            name: Some(format!("f{n}.png")),
            uploaded: 1_700_000_000,
            url: format!("https://a/{n}"),
            server_url: Some("https://a".into()),
            requires_auth: false,
            server_kind: Some(ServerKind::Blossom),
            folder_path: None,
            private_data: None,
        }
    }

    /// A primary store that always fails to persist.
    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn load(&self, _server_url: &str) -> Result<Option<CachedSnapshot>, StoreError> {
            Ok(None)
        }

        fn persist(&self, _server_url: &str, _snapshot: &CachedSnapshot) -> Result<(), StoreError> {
            Err(StoreError::Migration("quota exceeded".into()))
        }
    }

    fn cache_over(primary: Arc<dyn SnapshotStore>) -> SnapshotCache {
        SnapshotCache::new(primary, Arc::new(TimerScheduler), CacheConfig::default())
    }

    #[test]
    fn round_trip_preserves_sanitized_fields() {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        let blobs: Vec<Blob> = (0..3).map(blob).collect();

        cache.persist_now("https://a", &blobs);
        let loaded = cache.load("https://a").expect("cached");
        assert_eq!(loaded.blobs.len(), 3);
        for (cached, original) in loaded.blobs.iter().zip(&blobs) {
            assert_eq!(cached.sha256, original.sha256);
            assert_eq!(cached.size, original.size);
            assert_eq!(cached.mime_type, original.mime_type);
            assert_eq!(cached.name, original.name);
            assert_eq!(cached.uploaded, original.uploaded);
            assert_eq!(cached.url, original.url);
            assert_eq!(cached.requires_auth, original.requires_auth);
            assert_eq!(cached.server_kind, original.server_kind);
        }
    }

    #[test]
    fn failure_degrades_to_fallback_and_emergency_cap() {
        let cache = cache_over(Arc::new(FailingStore));
        let blobs: Vec<Blob> = (0..2).map(blob).collect();

        cache.persist_now("https://a", &blobs);
        assert!(cache.is_degraded());
        // The write survived in the fallback tier.
        assert_eq!(cache.load("https://a").unwrap().blobs.len(), 2);

        // Subsequent writes use the reduced cap.
        let many: Vec<Blob> = (0..200).map(|n| blob((n % 256) as u8)).collect();
        cache.persist_now("https://a", &many);
        assert_eq!(
            cache.load("https://a").unwrap().blobs.len(),
            SNAPSHOT_CACHE_EMERGENCY_CAP
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_persist_writes_once() {
        let primary = Arc::new(MemoryStore::new());
        let cache = cache_over(primary.clone() as Arc<dyn SnapshotStore>);

        cache.persist("https://a", &[blob(1)]);
        // Rescheduling with a changed list cancels the first write.
        cache.persist("https://a", &[blob(1), blob(2)]);

        tokio::time::sleep(Duration::from_millis(PERSIST_DEBOUNCE_MS * 2)).await;
        tokio::task::yield_now().await;

        let loaded = cache.load("https://a").expect("cached");
        assert_eq!(loaded.blobs.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_listing_is_not_rescheduled() {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        let blobs = vec![blob(1)];

        cache.persist_now("https://a", &blobs);
        // Seed the fingerprint, then verify persist() skips.
        cache.persist("https://a", &blobs);
        cache.persist("https://a", &blobs);
        let pending = cache.pending.lock().unwrap();
        assert_eq!(pending.len(), 1);
    }
}
