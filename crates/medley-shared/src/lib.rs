//! # medley-shared
//!
//! Domain types shared by every Medley crate: configured servers, blobs,
//! server snapshots, the local metadata overlay records, and transfer
//! activity entries.
//!
//! Everything here is plain data.  Network and storage behaviour live in
//! `medley-backend`, `medley-store` and `medley-core`.

pub mod constants;
pub mod metadata;
pub mod types;

pub use metadata::{AudioMetadata, MetadataPatch, Patch, StoredMetadata};
pub use types::*;
