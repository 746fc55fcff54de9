//! Storage seams consumed by the sync core.
//!
//! The core is written against these traits rather than [`crate::Database`]
//! directly, so tests can run on [`crate::MemoryStore`] and the snapshot
//! cache can fall back to the in-memory tier when SQLite writes fail.
//! All operations are best-effort from the caller's perspective: an `Err`
//! is a cache miss, never a correctness failure.

use medley_shared::{CachedSnapshot, StoredMetadata};

use crate::error::Result;

/// Persistent backing for the metadata overlay.
pub trait MetadataStore: Send + Sync {
    /// Read one `(scope, sha256)` row.
    fn get(&self, scope: &str, sha256: &str) -> Result<Option<StoredMetadata>>;

    /// Write one row, replacing any prior value.  Writing an empty record
    /// removes the row.
    fn put(&self, scope: &str, sha256: &str, metadata: &StoredMetadata) -> Result<()>;
}

/// Persistent backing for the snapshot cache.
pub trait SnapshotStore: Send + Sync {
    /// Read the last persisted listing for a server.  Malformed payloads
    /// are discarded and reported as `Ok(None)`.
    fn load(&self, server_url: &str) -> Result<Option<CachedSnapshot>>;

    /// Overwrite the persisted listing for a server.
    fn persist(&self, server_url: &str, snapshot: &CachedSnapshot) -> Result<()>;
}
