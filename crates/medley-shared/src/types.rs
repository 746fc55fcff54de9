//! Core domain models: servers, blobs, snapshots and transfer activity.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer or persisted by `medley-store`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Backend protocol spoken by a configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Blossom media server (supports server-to-server mirroring).
    Blossom,
    /// NIP-96 HTTP file storage server.
    Nip96,
    /// Satellite CDN storage API.  Always requires a signer, regardless of
    /// the server's `requires_auth` flag.
    Satellite,
}

impl ServerKind {
    /// Whether this backend needs a signer for every operation, even when
    /// the server configuration does not flag authentication.
    pub fn always_requires_signer(&self) -> bool {
        matches!(self, ServerKind::Satellite)
    }

    /// Whether this backend exposes a server-to-server mirror primitive.
    pub fn supports_mirror(&self) -> bool {
        matches!(self, ServerKind::Blossom)
    }
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerKind::Blossom => "blossom",
            ServerKind::Nip96 => "nip96",
            ServerKind::Satellite => "satellite",
        };
        write!(f, "{s}")
    }
}

/// A configured storage endpoint.  Created and edited by user
/// configuration; read-only to the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Base URL, unique key for the server.
    pub url: String,
    /// Backend protocol.
    pub kind: ServerKind,
    /// Whether listing requires authentication.
    pub requires_auth: bool,
    /// Whether the server participates in automatic replication.
    pub sync: bool,
    /// Display label.
    pub name: String,
}

impl Server {
    /// Whether any operation against this server needs a signer.
    pub fn needs_signer(&self) -> bool {
        self.requires_auth || self.kind.always_requires_signer()
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Encryption envelope attached to client-side-encrypted blobs.
///
/// Opaque to the sync core; carried along so replicas keep their
/// decryption parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateData {
    pub algorithm: String,
    pub key: String,
    pub iv: String,
    /// Cleartext file name, if known.
    pub name: Option<String>,
    /// Cleartext MIME type, if known.
    pub mime_type: Option<String>,
    /// Cleartext size in bytes, if known.
    pub size: Option<u64>,
}

/// A content-addressed object as reported by one server.
///
/// Two blobs with the same `sha256` on different servers are replicas of
/// the same logical file, even when their `name` or `mime_type` differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// 64-hex SHA-256 content hash, the primary key.
    pub sha256: String,
    /// Size in bytes; not every backend reports it.
    pub size: Option<u64>,
    /// MIME type, if known.
    pub mime_type: Option<String>,
    /// Display file name, if known.
    pub name: Option<String>,
    /// Upload time as a unix timestamp (seconds).
    pub uploaded: i64,
    /// Fetchable location of the bytes.
    pub url: String,
    /// Owning server URL; `None` for virtual / private-library blobs.
    pub server_url: Option<String>,
    /// Whether fetching the bytes requires authentication.
    pub requires_auth: bool,
    /// Backend protocol of the owning server, if any.
    pub server_kind: Option<ServerKind>,
    /// Virtual folder path overlay; `None` means root.
    pub folder_path: Option<String>,
    /// Encryption envelope for client-side-encrypted blobs.
    pub private_data: Option<PrivateData>,
}

impl Blob {
    /// Metadata completeness on a 2-point scale: one point each for a
    /// known name and a known MIME type.  Used to pick the best variant
    /// among replicas.
    pub fn completeness_score(&self) -> u8 {
        u8::from(self.name.is_some()) + u8::from(self.mime_type.is_some())
    }

    /// Whether this entry is an empty-marker placeholder rather than a
    /// real file.
    pub fn is_empty_marker(&self) -> bool {
        self.mime_type.as_deref() == Some(crate::constants::EMPTY_MARKER_MIME)
    }
}

/// Check that a string is a plausible 64-hex SHA-256 hash.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The live view of one server's listing.  Rebuilt whenever the fetch
/// result, cache or metadata overlay changes; never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub server: Server,
    pub blobs: Vec<Blob>,
    /// True only while a fetch is in flight for an active server.
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<String>,
}

impl ServerSnapshot {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            blobs: Vec::new(),
            is_loading: false,
            is_error: false,
            error: None,
        }
    }
}

/// Narrow projection of [`Blob`] persisted by the snapshot cache.
///
/// Drops transient fields (`server_url`, `folder_path`) and caps the
/// encryption envelope to algorithm + key + iv + name + type so a cached
/// listing stays bounded in size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBlob {
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub uploaded: i64,
    pub url: String,
    pub requires_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_kind: Option<ServerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<CachedPrivateData>,
}

/// Capped projection of [`PrivateData`] for the snapshot cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPrivateData {
    pub algorithm: String,
    pub key: String,
    pub iv: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl From<&Blob> for CachedBlob {
    fn from(blob: &Blob) -> Self {
        Self {
            sha256: blob.sha256.clone(),
            size: blob.size,
            mime_type: blob.mime_type.clone(),
            name: blob.name.clone(),
            uploaded: blob.uploaded,
            url: blob.url.clone(),
            requires_auth: blob.requires_auth,
            server_kind: blob.server_kind,
            private_data: blob.private_data.as_ref().map(|p| CachedPrivateData {
                algorithm: p.algorithm.clone(),
                key: p.key.clone(),
                iv: p.iv.clone(),
                name: p.name.clone(),
                mime_type: p.mime_type.clone(),
            }),
        }
    }
}

impl CachedBlob {
    /// Rehydrate a cached entry into a full [`Blob`] for a given server.
    pub fn into_blob(self, server: &Server) -> Blob {
        Blob {
            sha256: self.sha256,
            size: self.size,
            mime_type: self.mime_type,
            name: self.name,
            uploaded: self.uploaded,
            url: self.url,
            server_url: Some(server.url.clone()),
            requires_auth: self.requires_auth,
            server_kind: self.server_kind.or(Some(server.kind)),
            folder_path: None,
            private_data: self.private_data.map(|p| PrivateData {
                algorithm: p.algorithm,
                key: p.key,
                iv: p.iv,
                name: p.name,
                mime_type: p.mime_type,
                size: None,
            }),
        }
    }
}

/// Durable, sanitized snapshot of one server's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub blobs: Vec<CachedBlob>,
    /// Unix timestamp (seconds) of the write.
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Lifecycle of one copy operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Idle,
    Uploading,
    Success,
    Error,
}

/// What initiated a copy operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// A user-initiated upload.
    Manual,
    /// Issued by the automatic replication engine.
    Sync,
    /// A user-initiated cross-server transfer.
    Transfer,
}

/// One entry in the transfer activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferState {
    pub id: Uuid,
    pub server_url: String,
    pub file_name: String,
    pub transferred: u64,
    pub total: u64,
    pub status: TransferStatus,
    pub message: Option<String>,
    pub kind: TransferKind,
}

impl TransferState {
    pub fn new(kind: TransferKind, server_url: String, file_name: String, total: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_url,
            file_name,
            transferred: 0,
            total,
            status: TransferStatus::Idle,
            message: None,
            kind,
        }
    }
}

/// User-facing state of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced,
    Error,
}

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(name: Option<&str>, mime: Option<&str>) -> Blob {
        Blob {
            sha256: "a".repeat(64),
            size: Some(10),
            mime_type: mime.map(String::from),
            name: name.map(String::from),
            uploaded: 0,
            url: "https://cdn.example.com/a".into(),
            server_url: Some("https://cdn.example.com".into()),
            requires_auth: false,
            server_kind: Some(ServerKind::Blossom),
            folder_path: None,
            private_data: None,
        }
    }

    #[test]
    fn completeness_score_counts_name_and_type() {
        assert_eq!(blob(None, None).completeness_score(), 0);
        assert_eq!(blob(Some("a.png"), None).completeness_score(), 1);
        assert_eq!(blob(None, Some("image/png")).completeness_score(), 1);
        assert_eq!(blob(Some("a.png"), Some("image/png")).completeness_score(), 2);
    }

    #[test]
    fn satellite_always_needs_signer() {
        let server = Server {
            url: "https://sat.example.com".into(),
            kind: ServerKind::Satellite,
            requires_auth: false,
            sync: false,
            name: "satellite".into(),
        };
        assert!(server.needs_signer());
    }

    #[test]
    fn cached_blob_round_trips_sanitized_fields() {
        let b = blob(Some("song.mp3"), Some("audio/mpeg"));
        let cached = CachedBlob::from(&b);
        let server = Server {
            url: "https://cdn.example.com".into(),
            kind: ServerKind::Blossom,
            requires_auth: false,
            sync: true,
            name: "cdn".into(),
        };
        let back = cached.into_blob(&server);
        assert_eq!(back.sha256, b.sha256);
        assert_eq!(back.size, b.size);
        assert_eq!(back.mime_type, b.mime_type);
        assert_eq!(back.name, b.name);
        assert_eq!(back.uploaded, b.uploaded);
        assert_eq!(back.url, b.url);
        assert_eq!(back.requires_auth, b.requires_auth);
        assert_eq!(back.server_kind, b.server_kind);
    }

    #[test]
    fn sha256_hex_validation() {
        assert!(is_sha256_hex(&"ab".repeat(32)));
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"zz".repeat(32)));
    }
}
