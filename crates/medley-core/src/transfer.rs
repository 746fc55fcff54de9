//! Manual transfer engine.
//!
//! One user-initiated broadcast of selected blobs to chosen target
//! servers.  Unlike the replication engine there is no retry state: the
//! whole request runs once and the caller gets a per-copy report plus a
//! one-line summary suitable for a toast.

use std::sync::Arc;

use medley_backend::{BackendRegistry, Signer};
use medley_shared::{Blob, Server, TransferKind};
use tracing::info;

use crate::copy::{copy_blob, display_name, note_replica};
use crate::distribution::BlobDistribution;
use crate::log::TransferLog;
use crate::overlay::MetadataOverlay;

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub target_url: String,
    pub sha256: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub outcomes: Vec<TransferOutcome>,
    /// One-line summary of the whole request.
    pub message: String,
}

impl TransferReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub struct TransferEngine {
    registry: BackendRegistry,
    overlay: Arc<MetadataOverlay>,
    log: Arc<TransferLog>,
}

impl TransferEngine {
    pub fn new(
        registry: BackendRegistry,
        overlay: Arc<MetadataOverlay>,
        log: Arc<TransferLog>,
    ) -> Self {
        Self {
            registry,
            overlay,
            log,
        }
    }

    /// Copy `selection` to every eligible target.  The server the user
    /// is browsing is excluded, as is any target that already holds the
    /// whole selection.  Blobs a target already has are reported as
    /// successes without any network traffic.
    pub async fn transfer(
        &self,
        selection: &[Blob],
        targets: &[Server],
        distribution: &BlobDistribution,
        signer: Option<&dyn Signer>,
        current_server: Option<&str>,
    ) -> TransferReport {
        let mut report = TransferReport::default();
        let eligible: Vec<&Server> = targets
            .iter()
            .filter(|t| current_server != Some(t.url.as_str()))
            .filter(|t| {
                !selection
                    .iter()
                    .all(|blob| holds(distribution, &t.url, &blob.sha256))
            })
            .collect();
        if eligible.is_empty() {
            report.message = "Nothing to transfer".to_string();
            return report;
        }

        info!(
            blobs = selection.len(),
            targets = eligible.len(),
            "manual transfer started"
        );
        for target in eligible {
            for blob in selection {
                let outcome = self.transfer_one(target, blob, distribution, signer).await;
                report.outcomes.push(outcome);
            }
        }

        let failed = report.failed();
        report.message = if failed == 0 {
            format!("Transferred {} file(s)", report.succeeded())
        } else {
            format!(
                "Transferred {} file(s), {} failed",
                report.succeeded(),
                failed
            )
        };
        report
    }

    async fn transfer_one(
        &self,
        target: &Server,
        blob: &Blob,
        distribution: &BlobDistribution,
        signer: Option<&dyn Signer>,
    ) -> TransferOutcome {
        if holds(distribution, &target.url, &blob.sha256) {
            // Still note the replica so display metadata follows the
            // selection even when the bytes are already there.
            note_replica(&self.overlay, &target.url, blob);
            return TransferOutcome {
                target_url: target.url.clone(),
                sha256: blob.sha256.clone(),
                success: true,
                message: "Already present".to_string(),
            };
        }

        let total = blob.size.unwrap_or(0);
        let id = self
            .log
            .begin(TransferKind::Transfer, &target.url, &display_name(blob), total);
        self.log.start_upload(id);
        let progress = {
            let log = Arc::clone(&self.log);
            Arc::new(move |transferred: u64, total: u64| {
                log.progress(id, transferred, total);
            }) as medley_backend::ProgressFn
        };

        match copy_blob(&self.registry, target, blob, signer, false, Some(progress)).await {
            Ok(outcome) => {
                let message = if outcome.via_mirror {
                    "Mirrored".to_string()
                } else {
                    "Uploaded".to_string()
                };
                self.log.succeed(id, Some(message.clone()));
                note_replica(&self.overlay, &target.url, blob);
                TransferOutcome {
                    target_url: target.url.clone(),
                    sha256: blob.sha256.clone(),
                    success: true,
                    message,
                }
            }
            Err(failure) => {
                self.log.fail(id, failure.message.clone());
                TransferOutcome {
                    target_url: target.url.clone(),
                    sha256: blob.sha256.clone(),
                    success: false,
                    message: failure.message,
                }
            }
        }
    }
}

fn holds(distribution: &BlobDistribution, server_url: &str, sha256: &str) -> bool {
    distribution
        .get(sha256)
        .is_some_and(|entry| entry.servers.iter().any(|s| s == server_url))
}

#[cfg(test)]
mod tests {
    use medley_shared::ServerKind;
    use medley_store::MemoryStore;

    use super::*;
    use crate::testutil::{blob_on, mock_registry, seed_blob, server, snapshots_from, MockFailure};

    fn engine(registry: BackendRegistry) -> TransferEngine {
        TransferEngine::new(
            registry,
            MetadataOverlay::new(Arc::new(MemoryStore::new())),
            Arc::new(TransferLog::new()),
        )
    }

    #[tokio::test]
    async fn copies_selection_to_targets() {
        let (registry, state) = mock_registry();
        let a = server("https://a.example", ServerKind::Blossom, false);
        let b = server("https://b.example", ServerKind::Nip96, false);
        let blob = blob_on(&a, "1", Some("photo.jpg"), Some("image/jpeg"));
        seed_blob(&state, &a, &blob);

        let snapshots = snapshots_from(&state, &[a.clone(), b.clone()]);
        let distribution = BlobDistribution::build(&snapshots);
        let report = engine(registry)
            .transfer(&[blob.clone()], &[b.clone()], &distribution, None, Some(&a.url))
            .await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.message, "Transferred 1 file(s)");
        assert!(state.lock().unwrap().has_blob(&b.url, &blob.sha256));
    }

    #[tokio::test]
    async fn current_server_is_never_a_target() {
        let (registry, state) = mock_registry();
        let a = server("https://a.example", ServerKind::Blossom, false);
        let blob = blob_on(&a, "2", Some("note.txt"), Some("text/plain"));
        seed_blob(&state, &a, &blob);

        let snapshots = snapshots_from(&state, &[a.clone()]);
        let distribution = BlobDistribution::build(&snapshots);
        let report = engine(registry)
            .transfer(&[blob], &[a.clone()], &distribution, None, Some(&a.url))
            .await;

        assert!(report.outcomes.is_empty());
        assert_eq!(report.message, "Nothing to transfer");
    }

    #[tokio::test]
    async fn already_present_blob_is_a_free_success() {
        let (registry, state) = mock_registry();
        let a = server("https://a.example", ServerKind::Blossom, false);
        let b = server("https://b.example", ServerKind::Blossom, false);
        let shared = blob_on(&a, "3", Some("shared.bin"), None);
        let fresh = blob_on(&a, "4", Some("fresh.bin"), None);
        seed_blob(&state, &a, &shared);
        seed_blob(&state, &a, &fresh);
        seed_blob(&state, &b, &blob_on(&b, "3", None, None));

        let snapshots = snapshots_from(&state, &[a.clone(), b.clone()]);
        let distribution = BlobDistribution::build(&snapshots);
        let report = engine(registry)
            .transfer(
                &[shared.clone(), fresh.clone()],
                &[b.clone()],
                &distribution,
                None,
                Some(&a.url),
            )
            .await;

        assert_eq!(report.succeeded(), 2);
        let present = report
            .outcomes
            .iter()
            .find(|o| o.sha256 == shared.sha256)
            .unwrap();
        assert_eq!(present.message, "Already present");

        // Only the missing blob touched the network.
        let state = state.lock().unwrap();
        let traffic = state.mirror_calls.len() + state.upload_calls.len() + state.fetch_calls;
        assert_eq!(traffic, 1);
    }

    #[tokio::test]
    async fn failures_are_reported_per_copy() {
        let (registry, state) = mock_registry();
        let a = server("https://a.example", ServerKind::Nip96, false);
        let b = server("https://b.example", ServerKind::Nip96, false);
        let blob = blob_on(&a, "5", Some("big.mov"), Some("video/quicktime"));
        seed_blob(&state, &a, &blob);
        state
            .lock()
            .unwrap()
            .upload_failures
            .insert(b.url.clone(), MockFailure::Http(500));

        let snapshots = snapshots_from(&state, &[a.clone(), b.clone()]);
        let distribution = BlobDistribution::build(&snapshots);
        let report = engine(registry)
            .transfer(&[blob], &[b.clone()], &distribution, None, Some(&a.url))
            .await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.message, "Transferred 0 file(s), 1 failed");
        assert!(!report.outcomes[0].success);
    }
}
