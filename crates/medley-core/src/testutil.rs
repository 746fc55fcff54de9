//! Shared test doubles: an in-memory backend whose listings react to
//! uploads and mirrors, plus small builders for servers and blobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use medley_backend::{
    BackendError, BackendRegistry, BlobBackend, EventTemplate, ProgressFn, SignedEvent, Signer,
    UploadSource,
};
use medley_shared::{Blob, Server, ServerKind, ServerSnapshot};

#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Http(u16),
    Network,
}

impl MockFailure {
    fn to_error(self) -> BackendError {
        match self {
            MockFailure::Http(status) => BackendError::http(status, "mock failure"),
            MockFailure::Network => BackendError::Network("mock transport failure".into()),
        }
    }
}

/// Mutable world state behind the mock backend.  Listings are keyed by
/// server URL and updated by successful uploads and mirrors, so a test
/// can re-list after a pass and observe convergence.
#[derive(Default)]
pub struct MockState {
    pub listings: HashMap<String, Vec<Blob>>,
    pub mirror_failures: HashMap<String, MockFailure>,
    pub upload_failures: HashMap<String, MockFailure>,
    pub list_failures: HashMap<String, MockFailure>,
    pub mirror_calls: Vec<(String, String)>,
    pub upload_calls: Vec<(String, String)>,
    pub fetch_calls: usize,
}

impl MockState {
    pub fn has_blob(&self, server_url: &str, sha256: &str) -> bool {
        self.listings
            .get(server_url)
            .is_some_and(|blobs| blobs.iter().any(|b| b.sha256 == sha256))
    }

    fn add_blob(&mut self, server: &Server, blob: Blob) {
        let listing = self.listings.entry(server.url.clone()).or_default();
        if !listing.iter().any(|b| b.sha256 == blob.sha256) {
            listing.push(blob);
        }
    }
}

pub struct MockBackend {
    pub state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl BlobBackend for MockBackend {
    async fn list_blobs(
        &self,
        server: &Server,
        _signer: Option<&dyn Signer>,
    ) -> Result<Vec<Blob>, BackendError> {
        let state = self.state.lock().unwrap();
        if let Some(failure) = state.list_failures.get(&server.url) {
            return Err(failure.to_error());
        }
        Ok(state.listings.get(&server.url).cloned().unwrap_or_default())
    }

    async fn upload_blob(
        &self,
        server: &Server,
        source: UploadSource,
        _signer: Option<&dyn Signer>,
        progress: Option<ProgressFn>,
    ) -> Result<Blob, BackendError> {
        let mut state = self.state.lock().unwrap();
        state
            .upload_calls
            .push((server.url.clone(), source.file_name.clone()));
        if let Some(failure) = state.upload_failures.get(&server.url) {
            return Err(failure.to_error());
        }
        // The mock fetch returns the sha256 as the payload, so the
        // "content hash" of an upload is just its bytes.
        let sha256 = String::from_utf8(source.bytes.to_vec())
            .map_err(|_| BackendError::Malformed("mock payload is not a hash".into()))?;
        let total = source.size.unwrap_or(source.bytes.len() as u64);
        if let Some(progress) = progress {
            progress(total / 2, total);
            progress(total, total);
        }
        let blob = Blob {
            sha256: sha256.clone(),
            size: source.size,
            mime_type: source.content_type.clone(),
            name: Some(source.file_name.clone()),
            uploaded: 1_700_000_000,
            url: format!("{}/{}", server.url, sha256),
            server_url: Some(server.url.clone()),
            requires_auth: server.requires_auth,
            server_kind: Some(server.kind),
            folder_path: None,
            private_data: None,
        };
        state.add_blob(server, blob.clone());
        Ok(blob)
    }

    async fn delete_blob(
        &self,
        server: &Server,
        sha256: &str,
        _signer: Option<&dyn Signer>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if let Some(listing) = state.listings.get_mut(&server.url) {
            listing.retain(|b| b.sha256 != sha256);
        }
        Ok(())
    }

    async fn mirror_blob(
        &self,
        server: &Server,
        source_url: &str,
        sha256: &str,
        _signer: Option<&dyn Signer>,
    ) -> Result<Blob, BackendError> {
        let mut state = self.state.lock().unwrap();
        state
            .mirror_calls
            .push((server.url.clone(), sha256.to_string()));
        if let Some(failure) = state.mirror_failures.get(&server.url) {
            return Err(failure.to_error());
        }
        let _ = source_url;
        let blob = Blob {
            sha256: sha256.to_string(),
            size: None,
            mime_type: None,
            name: None,
            uploaded: 1_700_000_000,
            url: format!("{}/{}", server.url, sha256),
            server_url: Some(server.url.clone()),
            requires_auth: server.requires_auth,
            server_kind: Some(server.kind),
            folder_path: None,
            private_data: None,
        };
        state.add_blob(server, blob.clone());
        Ok(blob)
    }

    async fn fetch_blob(
        &self,
        blob: &Blob,
        _signer: Option<&dyn Signer>,
    ) -> Result<Bytes, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        Ok(Bytes::from(blob.sha256.clone()))
    }
}

/// A signer that approves everything.
pub struct MockSigner;

#[async_trait]
impl Signer for MockSigner {
    async fn sign(&self, template: EventTemplate) -> Result<SignedEvent, BackendError> {
        Ok(SignedEvent {
            id: "0".repeat(64),
            pubkey: self.pubkey(),
            sig: "0".repeat(128),
            kind: template.kind,
            content: template.content,
            tags: template.tags,
            created_at: template.created_at,
        })
    }

    fn pubkey(&self) -> String {
        "f".repeat(64)
    }
}

/// A registry where every protocol routes to the same mock backend.
pub fn mock_registry() -> (BackendRegistry, Arc<Mutex<MockState>>) {
    let state = Arc::new(Mutex::new(MockState::default()));
    let backend = Arc::new(MockBackend {
        state: state.clone(),
    });
    let registry = BackendRegistry::new()
        .with_backend(ServerKind::Blossom, backend.clone())
        .with_backend(ServerKind::Nip96, backend.clone())
        .with_backend(ServerKind::Satellite, backend);
    (registry, state)
}

pub fn server(url: &str, kind: ServerKind, sync: bool) -> Server {
    Server {
        url: url.to_string(),
        kind,
        requires_auth: false,
        sync,
        name: url.to_string(),
    }
}

pub fn blob_on(server: &Server, hash_seed: &str, name: Option<&str>, mime: Option<&str>) -> Blob {
    let sha256 = hash_seed.repeat(64 / hash_seed.len());
    Blob {
        sha256: sha256.clone(),
        size: Some(1_000),
        mime_type: mime.map(String::from),
        name: name.map(String::from),
        uploaded: 1_690_000_000,
        url: format!("{}/{}", server.url, sha256),
        server_url: Some(server.url.clone()),
        requires_auth: false,
        server_kind: Some(server.kind),
        folder_path: None,
        private_data: None,
    }
}

/// Seed a blob into the mock world.
pub fn seed_blob(state: &Arc<Mutex<MockState>>, server: &Server, blob: &Blob) {
    state
        .lock()
        .unwrap()
        .listings
        .entry(server.url.clone())
        .or_default()
        .push(blob.clone());
}

/// Build settled snapshots from the mock world, in the given server order.
pub fn snapshots_from(state: &Arc<Mutex<MockState>>, servers: &[Server]) -> Vec<ServerSnapshot> {
    let state = state.lock().unwrap();
    servers
        .iter()
        .map(|server| ServerSnapshot {
            server: server.clone(),
            blobs: state.listings.get(&server.url).cloned().unwrap_or_default(),
            is_loading: false,
            is_error: false,
            error: None,
        })
        .collect()
}
