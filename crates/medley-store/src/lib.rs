//! # medley-store
//!
//! Local persistent storage for the sync core, backed by SQLite.
//!
//! Two tables: the metadata overlay (`(scope, sha256)` rows) and the
//! per-server snapshot cache (versioned JSON payloads).  The crate also
//! provides an in-memory store used both as the cache's fallback tier
//! when SQLite writes fail and as a test double.
//!
//! Persistence here is best-effort: callers treat every error as a cache
//! miss, never as a correctness failure.

pub mod database;
pub mod memory;
pub mod metadata;
pub mod migrations;
pub mod snapshots;
pub mod traits;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use traits::{MetadataStore, SnapshotStore};
