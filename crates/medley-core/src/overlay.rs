//! Metadata overlay store.
//!
//! Keeps a synchronous in-memory view of the `(scope, sha256)` metadata
//! rows, writes through to the persistent store, and notifies
//! subscribers through a version counter.  Writes from bulk list merges
//! go through the batched path so same-tick patches for one key collapse
//! into a single persisted write and a single notification.
//!
//! The overlay is an explicitly constructed object passed into the
//! scheduler and engines; tests get isolation by building one per test
//! over a [`medley_store::MemoryStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use medley_shared::constants::GLOBAL_SCOPE;
use medley_shared::{now_ts, AudioMetadata, MetadataPatch, Patch, StoredMetadata};
use medley_store::MetadataStore;
use tokio::sync::watch;

type Key = (String, String);

pub struct MetadataOverlay {
    store: Arc<dyn MetadataStore>,
    /// Read-through cache; `None` records a confirmed store miss.
    cache: Mutex<HashMap<Key, Option<StoredMetadata>>>,
    /// Same-tick patches awaiting a coalesced flush.
    pending: Mutex<HashMap<Key, MetadataPatch>>,
    flush_scheduled: AtomicBool,
    version: watch::Sender<u64>,
}

impl MetadataOverlay {
    pub fn new(store: Arc<dyn MetadataStore>) -> Arc<Self> {
        let (version, _rx) = watch::channel(0);
        Arc::new(Self {
            store,
            cache: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            flush_scheduled: AtomicBool::new(false),
            version,
        })
    }

    /// Subscribe to version bumps.  The value itself is only a change
    /// counter; read data through [`MetadataOverlay::get`].
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Read the reconciled metadata for a hash as seen from one scope:
    /// the server-scoped row merged with the global alias row,
    /// most-recent `updated_at` winning per field.
    pub fn get(&self, scope: &str, sha256: &str) -> Option<StoredMetadata> {
        let scoped = self.raw(scope, sha256);
        if scope == GLOBAL_SCOPE {
            return scoped;
        }
        let global = self.raw(GLOBAL_SCOPE, sha256);
        StoredMetadata::reconcile(scoped.as_ref(), global.as_ref())
    }

    /// Whether a network metadata probe can be skipped for this key.
    pub fn is_fresh(&self, scope: &str, sha256: &str) -> bool {
        self.get(scope, sha256)
            .is_some_and(|meta| meta.is_fresh(now_ts()))
    }

    /// Apply a merge-patch immediately: in-memory update, persisted
    /// write, one version bump.
    pub fn set(&self, scope: &str, sha256: &str, patch: MetadataPatch) {
        if patch.is_noop() {
            return;
        }
        self.apply(scope, sha256, &patch);
        self.bump();
    }

    /// Queue a merge-patch for the coalesced flush.  Multiple same-tick
    /// patches for one `(scope, sha256)` merge into a single write, and
    /// the whole batch produces a single notification.
    pub fn set_batched(self: &Arc<Self>, scope: &str, sha256: &str, patch: MetadataPatch) {
        if patch.is_noop() {
            return;
        }
        {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            let key = (scope.to_string(), sha256.to_string());
            let merged = match pending.remove(&key) {
                Some(prior) => prior.merge(patch),
                None => patch,
            };
            pending.insert(key, merged);
        }

        if !self.flush_scheduled.swap(true, Ordering::SeqCst) {
            let overlay = Arc::clone(self);
            tokio::spawn(async move {
                // Let the current tick finish queueing before flushing.
                tokio::task::yield_now().await;
                overlay.flush();
            });
        }
    }

    /// Write a user-assigned display name as a global alias, so it
    /// follows the hash onto every server.  `None` clears the alias.
    pub fn set_alias(&self, sha256: &str, name: Option<String>) {
        let patch = MetadataPatch {
            name: match name {
                Some(name) => Patch::Set(name),
                None => Patch::Clear,
            },
            updated_at: Some(now_ts()),
            ..MetadataPatch::default()
        };
        self.set(GLOBAL_SCOPE, sha256, patch);
    }

    /// Record audio tags extracted at upload time, through the batch
    /// path so tagging a whole album is one write and one notification.
    pub fn note_audio(self: &Arc<Self>, scope: &str, sha256: &str, audio: AudioMetadata) {
        let Some(audio) = audio.normalized() else {
            return;
        };
        let patch = MetadataPatch {
            audio: Patch::Set(audio),
            updated_at: Some(now_ts()),
            ..MetadataPatch::default()
        };
        self.set_batched(scope, sha256, patch);
    }

    /// Drain and apply all pending batched patches.  Public so callers
    /// without a runtime (tests, teardown) can force the flush.
    pub fn flush(&self) {
        self.flush_scheduled.store(false, Ordering::SeqCst);
        let drained: Vec<(Key, MetadataPatch)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.drain().collect()
        };
        if drained.is_empty() {
            return;
        }
        for ((scope, sha256), patch) in &drained {
            self.apply(scope, sha256, patch);
        }
        self.bump();
    }

    /// Apply one patch: compute the full new row, store it in memory,
    /// then write it through.  The store write is best-effort; the
    /// in-memory view stays authoritative for the session.
    fn apply(&self, scope: &str, sha256: &str, patch: &MetadataPatch) {
        let base = self.raw(scope, sha256).unwrap_or_default();
        let next = patch.apply_to(&base);

        {
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            let value = if next.is_empty() { None } else { Some(next.clone()) };
            cache.insert((scope.to_string(), sha256.to_string()), value);
        }

        if let Err(e) = self.store.put(scope, sha256, &next) {
            tracing::warn!(scope, sha256, error = %e, "metadata store write failed");
        }
    }

    /// Read one row without reconciliation, through the cache.
    fn raw(&self, scope: &str, sha256: &str) -> Option<StoredMetadata> {
        let key = (scope.to_string(), sha256.to_string());
        {
            let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cached) = cache.get(&key) {
                return cached.clone();
            }
        }

        let loaded = match self.store.get(scope, sha256) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(scope, sha256, error = %e, "metadata store read failed");
                None
            }
        };

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(key, loaded.clone());
        loaded
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
