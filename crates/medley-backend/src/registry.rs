//! Dispatch table from [`ServerKind`] to a backend implementation.
//!
//! Replaces string-typed dispatch with a single lookup: the core never
//! branches on protocol names, it asks the registry for the right
//! [`BlobBackend`].

use std::collections::HashMap;
use std::sync::Arc;

use medley_shared::{Blob, Server, ServerKind};

use crate::backend::BlobBackend;
use crate::error::BackendError;
use crate::signer::Signer;

/// Registry of backend implementations, keyed by protocol.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<ServerKind, Arc<dyn BlobBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_backend(mut self, kind: ServerKind, backend: Arc<dyn BlobBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    pub fn register(&mut self, kind: ServerKind, backend: Arc<dyn BlobBackend>) {
        self.backends.insert(kind, backend);
    }

    /// Backend for a configured server.
    pub fn for_server(&self, server: &Server) -> Result<Arc<dyn BlobBackend>, BackendError> {
        self.for_kind(server.kind)
    }

    /// Backend for the server a blob was listed by.  Virtual blobs with
    /// no owning server are not fetchable through the registry.
    pub fn for_blob(&self, blob: &Blob) -> Result<Arc<dyn BlobBackend>, BackendError> {
        let kind = blob
            .server_kind
            .ok_or_else(|| BackendError::Malformed(format!("blob {} has no server kind", blob.sha256)))?;
        self.for_kind(kind)
    }

    pub fn for_kind(&self, kind: ServerKind) -> Result<Arc<dyn BlobBackend>, BackendError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or(BackendError::NoBackend(kind))
    }

    /// One-call delete for hosts; the caller refreshes the listing.
    pub async fn delete_blob(
        &self,
        server: &Server,
        sha256: &str,
        signer: Option<&dyn Signer>,
    ) -> Result<(), BackendError> {
        self.for_server(server)?
            .delete_blob(server, sha256, signer)
            .await
    }
}

// `Arc<dyn BlobBackend>` has no useful Debug; show registered kinds only.
impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
