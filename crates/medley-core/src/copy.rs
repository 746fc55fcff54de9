//! Shared copy primitives for both the replication engine and manual
//! transfers: mirror-by-reference with a fetch-then-reupload fallback,
//! plus the failure classification that drives retry policy.

use std::sync::Arc;

use medley_backend::{BackendError, BackendRegistry, ProgressFn, Signer, UploadSource};
use medley_shared::{now_ts, Blob, MetadataPatch, Patch, Server};
use thiserror::Error;

use crate::overlay::MetadataOverlay;

/// How a copy failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient; retry after a short cooldown.
    Retryable,
    /// 401 or missing signer.  Permanent until a signer reconnects.
    Unauthorized,
    /// The target does not implement the mirror primitive.  Permanent
    /// for the mirror path only.
    UnsupportedMirror,
    /// The request never reached the target (CORS / transport).
    /// Permanent for the session; retrying will not change the policy.
    NetworkBlocked,
}

/// A classified copy failure.  The message is surfaced verbatim on the
/// transfer entry.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CopyFailure {
    pub class: FailureClass,
    pub message: String,
    /// True when the attempt discovered that the target rejects the
    /// mirror primitive before the fallback itself failed.  Callers
    /// memoize this so the target is not probed again.
    pub mirror_unsupported: bool,
}

impl CopyFailure {
    fn new(class: FailureClass, err: &BackendError) -> Self {
        Self {
            class,
            message: err.to_string(),
            mirror_unsupported: false,
        }
    }

    fn retryable(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Retryable,
            message: message.into(),
            mirror_unsupported: false,
        }
    }

    fn discovered_mirror_unsupported(mut self, flag: bool) -> Self {
        self.mirror_unsupported = flag;
        self
    }
}

/// Classify a backend error.  404/405 mean "mirror unsupported" only on
/// the mirror path; on uploads and fetches they are ordinary transient
/// server trouble.
pub fn classify(err: &BackendError, during_mirror: bool) -> FailureClass {
    match err {
        BackendError::Http { status: 401, .. } => FailureClass::Unauthorized,
        BackendError::Http {
            status: 404 | 405, ..
        } if during_mirror => FailureClass::UnsupportedMirror,
        BackendError::Network(_) => FailureClass::NetworkBlocked,
        BackendError::SignerMissing | BackendError::Signing(_) => FailureClass::Unauthorized,
        _ => FailureClass::Retryable,
    }
}

/// Result of a successful copy.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    /// The target server's descriptor for the new replica.
    pub blob: Blob,
    pub via_mirror: bool,
    /// True when this copy discovered that the target does not support
    /// mirroring (the fallback was used).  Callers memoize this.
    pub mirror_unsupported: bool,
}

/// Display name for a blob in the activity feed.
pub fn display_name(blob: &Blob) -> String {
    blob.name
        .clone()
        .unwrap_or_else(|| blob.sha256.chars().take(8).collect())
}

/// Copy one blob to one target server.
///
/// Blossom targets get a mirror-by-reference attempt first (unless the
/// caller already knows mirroring is unsupported there); every other
/// backend, and every mirror fallback, goes through fetch-then-reupload.
pub async fn copy_blob(
    registry: &BackendRegistry,
    target: &Server,
    source: &Blob,
    signer: Option<&dyn Signer>,
    skip_mirror: bool,
    progress: Option<ProgressFn>,
) -> Result<CopyOutcome, CopyFailure> {
    let target_backend = registry
        .for_server(target)
        .map_err(|e| CopyFailure::retryable(e.to_string()))?;

    let mut mirror_unsupported = false;
    if target.kind.supports_mirror() && !skip_mirror {
        match target_backend
            .mirror_blob(target, &source.url, &source.sha256, signer)
            .await
        {
            Ok(blob) => {
                tracing::debug!(target = %target.url, sha256 = %source.sha256, "mirrored by reference");
                return Ok(CopyOutcome {
                    blob,
                    via_mirror: true,
                    mirror_unsupported: false,
                });
            }
            Err(err) => match classify(&err, true) {
                FailureClass::UnsupportedMirror => {
                    // Discovered dynamically; fall back to reupload once.
                    tracing::debug!(target = %target.url, "mirror unsupported, falling back to reupload");
                    mirror_unsupported = true;
                }
                class => return Err(CopyFailure::new(class, &err)),
            },
        }
    }

    // Fetch from the source with its own auth.  A transport failure here
    // says nothing about the target, so it stays retryable.
    let source_backend = registry
        .for_blob(source)
        .map_err(|e| CopyFailure::retryable(e.to_string()))?;
    let bytes = source_backend
        .fetch_blob(source, signer)
        .await
        .map_err(|err| {
            let class = match classify(&err, false) {
                FailureClass::NetworkBlocked => FailureClass::Retryable,
                other => other,
            };
            CopyFailure::new(class, &err).discovered_mirror_unsupported(mirror_unsupported)
        })?;

    let mut upload = UploadSource::new(bytes, display_name(source));
    upload.content_type = source.mime_type.clone();
    upload.size = source.size.or(upload.size);

    let blob = target_backend
        .upload_blob(target, upload, signer, progress)
        .await
        .map_err(|err| {
            CopyFailure::new(classify(&err, false), &err)
                .discovered_mirror_unsupported(mirror_unsupported)
        })?;

    Ok(CopyOutcome {
        blob,
        via_mirror: false,
        mirror_unsupported,
    })
}

/// Post-copy bookkeeping shared by both engines: carry the source's
/// display metadata into the destination scope and propagate the
/// virtual folder membership.
pub fn note_replica(overlay: &Arc<MetadataOverlay>, target_url: &str, source: &Blob) {
    let mut patch = MetadataPatch::default();
    if let Some(name) = &source.name {
        patch.name = Patch::Set(name.clone());
    }
    if let Some(mime) = &source.mime_type {
        patch.mime_type = Patch::Set(mime.clone());
    }
    if let Some(folder) = &source.folder_path {
        patch.folder_path = Patch::Set(folder.clone());
    }
    patch.last_checked_at = Some(now_ts());
    overlay.set_batched(target_url, &source.sha256, patch);
}
