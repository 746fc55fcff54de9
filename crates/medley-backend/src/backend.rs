//! The per-protocol backend contract.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use medley_shared::{Blob, Server};

use crate::error::BackendError;
use crate::signer::Signer;

/// Progress callback: `(transferred_bytes, total_bytes)`.
///
/// `total_bytes` may be an estimate when the backend does not know the
/// exact size up front.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Bytes and descriptive metadata for an upload.
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl UploadSource {
    pub fn new(bytes: Bytes, file_name: impl Into<String>) -> Self {
        let size = Some(bytes.len() as u64);
        Self {
            bytes,
            file_name: file_name.into(),
            content_type: None,
            size,
        }
    }
}

/// One implementation per backend protocol.
///
/// Implementations must return `sha256` for every listed blob, should
/// return `size`, `mime_type`, `name` and `uploaded` when known, and must
/// return a best-effort `url`.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Fetch the server's full blob listing.
    async fn list_blobs(
        &self,
        server: &Server,
        signer: Option<&dyn Signer>,
    ) -> Result<Vec<Blob>, BackendError>;

    /// Upload bytes, returning the server's descriptor for the new blob.
    async fn upload_blob(
        &self,
        server: &Server,
        source: UploadSource,
        signer: Option<&dyn Signer>,
        progress: Option<ProgressFn>,
    ) -> Result<Blob, BackendError>;

    /// Delete a blob by content hash.
    async fn delete_blob(
        &self,
        server: &Server,
        sha256: &str,
        signer: Option<&dyn Signer>,
    ) -> Result<(), BackendError>;

    /// Ask the server to copy a blob from `source_url` by reference.
    ///
    /// Not every server supports this; unsupported servers answer 404 or
    /// 405, which callers discover dynamically rather than by
    /// pre-declaration.
    async fn mirror_blob(
        &self,
        server: &Server,
        source_url: &str,
        sha256: &str,
        signer: Option<&dyn Signer>,
    ) -> Result<Blob, BackendError>;

    /// Download a blob's bytes from its source location, with whatever
    /// auth the source requires.
    async fn fetch_blob(
        &self,
        blob: &Blob,
        signer: Option<&dyn Signer>,
    ) -> Result<Bytes, BackendError>;
}
