//! Replication engine.
//!
//! Converges the linked (sync-enabled) servers toward holding the union
//! of their blobs.  Work is planned from a [`BlobDistribution`], copies
//! run a bounded number at a time per target, and every attempt leaves a
//! per-(target, hash) cooldown so a flapping server cannot trigger a
//! retry storm.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use medley_backend::{BackendRegistry, Signer};
use medley_shared::constants::{
    COOLDOWN_DONE_SECS, COOLDOWN_PERMANENT_SECS, COOLDOWN_RETRYABLE_SECS, MAX_CONCURRENT_COPIES,
};
use medley_shared::{Blob, Server, ServerSnapshot, SyncStatus, TransferKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::copy::{copy_blob, display_name, note_replica, CopyFailure, CopyOutcome, FailureClass};
use crate::distribution::BlobDistribution;
use crate::log::TransferLog;
use crate::overlay::MetadataOverlay;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cooldown after a successful copy.
    pub cooldown_done: Duration,
    /// Cooldown after a retryable failure.
    pub cooldown_retryable: Duration,
    /// Cooldown after auth / capability / network-blocked failures.
    pub cooldown_permanent: Duration,
    /// Concurrent copies per target.
    pub max_concurrent_copies: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cooldown_done: Duration::from_secs(COOLDOWN_DONE_SECS),
            cooldown_retryable: Duration::from_secs(COOLDOWN_RETRYABLE_SECS),
            cooldown_permanent: Duration::from_secs(COOLDOWN_PERMANENT_SECS),
            max_concurrent_copies: MAX_CONCURRENT_COPIES,
        }
    }
}

/// Externally visible state of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView {
    pub status: SyncStatus,
    /// Aggregate fraction of the current sync transfers, 0.0..=1.0.
    pub progress: f32,
    /// Human-readable hint when the engine is stuck, e.g. a signer ask.
    pub message: Option<String>,
}

impl Default for SyncView {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            progress: 1.0,
            message: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct SyncEngine {
    registry: BackendRegistry,
    overlay: Arc<MetadataOverlay>,
    log: Arc<TransferLog>,
    config: SyncConfig,
    signer: Option<Arc<dyn Signer>>,
    /// Per-(target, hash) earliest next attempt.
    cooldowns: HashMap<(String, String), Instant>,
    /// Targets with a blocking failure; skipped wholesale until expiry.
    target_failures: HashMap<String, (FailureClass, Instant)>,
    /// Blossom targets that answered 404/405 to mirror-by-reference.
    mirror_unsupported: HashSet<String>,
    status_tx: watch::Sender<SyncView>,
}

impl SyncEngine {
    pub fn new(
        registry: BackendRegistry,
        overlay: Arc<MetadataOverlay>,
        log: Arc<TransferLog>,
        config: SyncConfig,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(SyncView::default());
        Self {
            registry,
            overlay,
            log,
            config,
            signer: None,
            cooldowns: HashMap::new(),
            target_failures: HashMap::new(),
            mirror_unsupported: HashSet::new(),
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.status_tx.subscribe()
    }

    /// Swap the signer.  A newly connected signer clears memoized auth
    /// failures so gated targets are retried right away.
    pub fn set_signer(&mut self, signer: Option<Arc<dyn Signer>>) {
        let connected = signer.is_some();
        self.signer = signer;
        if connected {
            self.target_failures
                .retain(|_, (class, _)| *class != FailureClass::Unauthorized);
        }
    }

    /// Explicit user restart: forget every cooldown and memoized failure
    /// and try everything again.
    pub fn start_sync(&mut self) {
        self.cooldowns.clear();
        self.target_failures.clear();
        self.mirror_unsupported.clear();
    }

    /// Whether every blob on any linked server is present on all linked
    /// servers.  Snapshots still loading are skipped, so the answer can
    /// transiently over-report while a listing is in flight.
    pub fn is_fully_synced(snapshots: &[ServerSnapshot]) -> bool {
        let settled: Vec<&ServerSnapshot> = snapshots
            .iter()
            .filter(|s| s.server.sync && !s.is_loading)
            .collect();
        if settled.len() < 2 {
            return true;
        }
        let mut union: HashSet<&str> = HashSet::new();
        for snapshot in &settled {
            for blob in &snapshot.blobs {
                union.insert(blob.sha256.as_str());
            }
        }
        settled.iter().all(|snapshot| {
            let held: HashSet<&str> =
                snapshot.blobs.iter().map(|b| b.sha256.as_str()).collect();
            union.iter().all(|hash| held.contains(hash))
        })
    }

    /// Plan and execute one replication pass over the given view.
    /// Returns counts; `attempted == 0` means the pass was a no-op and
    /// the engine has reached quiescence for this view.
    pub async fn run_pass(&mut self, snapshots: &[ServerSnapshot]) -> PassReport {
        let linked: Vec<Server> = snapshots
            .iter()
            .filter(|s| s.server.sync)
            .map(|s| s.server.clone())
            .collect();
        let mut report = PassReport::default();
        if linked.len() < 2 {
            return report;
        }

        let distribution = BlobDistribution::build(snapshots);
        let linked_urls: HashSet<&str> = linked.iter().map(|s| s.url.as_str()).collect();
        let now = Instant::now();

        for target in &linked {
            if let Some((class, until)) = self.target_failures.get(&target.url) {
                if *until > now {
                    debug!(target = %target.url, class = ?class, "skipping target on memoized failure");
                    continue;
                }
                self.target_failures.remove(&target.url);
            }
            let sources = self.plan_for_target(target, &distribution, &linked_urls, snapshots, now);
            if sources.is_empty() {
                continue;
            }
            info!(target = %target.url, missing = sources.len(), "replicating toward target");
            self.copy_batch(target, sources, &mut report).await;
        }
        report
    }

    /// Blobs missing from `target` that some linked server can provide,
    /// excluding pairs still cooling down.  The copied variant is the
    /// one listed by the source server (its URL is fetchable there),
    /// carrying the best-known display fields from the distribution.
    fn plan_for_target(
        &self,
        target: &Server,
        distribution: &BlobDistribution,
        linked_urls: &HashSet<&str>,
        snapshots: &[ServerSnapshot],
        now: Instant,
    ) -> Vec<Blob> {
        let mut sources = Vec::new();
        for (hash, entry) in distribution.iter() {
            if entry.servers.iter().any(|s| s == &target.url) {
                continue;
            }
            let Some(source_url) = entry
                .servers
                .iter()
                .find(|s| linked_urls.contains(s.as_str()))
            else {
                continue;
            };
            let key = (target.url.clone(), hash.to_string());
            if self.cooldowns.get(&key).is_some_and(|until| *until > now) {
                continue;
            }
            let Some(snapshot) = snapshots.iter().find(|s| &s.server.url == source_url) else {
                continue;
            };
            let Some(mut source) = snapshot
                .blobs
                .iter()
                .find(|b| b.sha256 == *hash)
                .cloned()
            else {
                continue;
            };
            if entry.blob.name.is_some() {
                source.name = entry.blob.name.clone();
            }
            if entry.blob.mime_type.is_some() {
                source.mime_type = entry.blob.mime_type.clone();
            }
            if entry.blob.folder_path.is_some() {
                source.folder_path = entry.blob.folder_path.clone();
            }
            sources.push(source);
        }
        sources
    }

    /// Run the planned copies for one target, bounded by
    /// `max_concurrent_copies`.  A blocking failure (auth, network)
    /// stops launching further copies toward this target; in-flight
    /// ones are allowed to settle.
    async fn copy_batch(&mut self, target: &Server, sources: Vec<Blob>, report: &mut PassReport) {
        let limit = self.config.max_concurrent_copies.max(1);
        let mut queue = sources.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut blocked = false;
        loop {
            while !blocked && in_flight.len() < limit {
                match queue.next() {
                    Some(source) => in_flight.push(self.launch_copy(target, source)),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some(done) => {
                    report.attempted += 1;
                    if self.settle(target, done, report) {
                        blocked = true;
                    }
                }
                None => break,
            }
        }
    }

    fn launch_copy(
        &self,
        target: &Server,
        source: Blob,
    ) -> impl std::future::Future<Output = CopyDone> + 'static {
        let registry = self.registry.clone();
        let signer = self.signer.clone();
        let log = Arc::clone(&self.log);
        let skip_mirror = self.mirror_unsupported.contains(&target.url);
        let target = target.clone();
        async move {
            let total = source.size.unwrap_or(0);
            let id = log.begin(TransferKind::Sync, &target.url, &display_name(&source), total);
            log.start_upload(id);
            let progress = {
                let log = Arc::clone(&log);
                Arc::new(move |transferred: u64, total: u64| {
                    log.progress(id, transferred, total);
                }) as medley_backend::ProgressFn
            };
            let result = copy_blob(
                &registry,
                &target,
                &source,
                signer.as_deref(),
                skip_mirror,
                Some(progress),
            )
            .await;
            CopyDone { id, source, result }
        }
    }

    /// Record one settled copy: log entry, cooldown, memoization.
    /// Returns true when the failure should block the rest of the pass
    /// for this target.
    fn settle(&mut self, target: &Server, done: CopyDone, report: &mut PassReport) -> bool {
        let key = (target.url.clone(), done.source.sha256.clone());
        match done.result {
            Ok(outcome) => {
                report.succeeded += 1;
                if outcome.mirror_unsupported {
                    self.mirror_unsupported.insert(target.url.clone());
                }
                self.cooldowns
                    .insert(key, Instant::now() + self.config.cooldown_done);
                let note = if outcome.via_mirror {
                    "Mirrored"
                } else {
                    "Uploaded"
                };
                self.log.succeed(done.id, Some(note.to_string()));
                note_replica(&self.overlay, &target.url, &done.source);
                false
            }
            Err(failure) => {
                report.failed += 1;
                if failure.mirror_unsupported {
                    self.mirror_unsupported.insert(target.url.clone());
                }
                self.log.fail(done.id, failure.message.clone());
                let cooldown = match failure.class {
                    FailureClass::Retryable => self.config.cooldown_retryable,
                    _ => self.config.cooldown_permanent,
                };
                self.cooldowns.insert(key, Instant::now() + cooldown);
                let blocking = matches!(
                    failure.class,
                    FailureClass::Unauthorized | FailureClass::NetworkBlocked
                );
                if blocking {
                    warn!(
                        target = %target.url,
                        class = ?failure.class,
                        error = %failure.message,
                        "target blocked for this pass"
                    );
                    self.target_failures.insert(
                        target.url.clone(),
                        (failure.class, Instant::now() + self.config.cooldown_permanent),
                    );
                }
                blocking
            }
        }
    }

    /// Run passes until a pass attempts nothing, then publish the
    /// settled status for this view.
    pub async fn reconcile(&mut self, snapshots: &[ServerSnapshot]) {
        let linked = snapshots.iter().filter(|s| s.server.sync).count();
        if linked < 2 {
            self.publish(SyncStatus::Idle, None);
            return;
        }
        self.publish(SyncStatus::Syncing, None);
        let mut failed = 0;
        // Cooldowns guarantee each pass shrinks the plan, but cap the
        // loop anyway.
        for _ in 0..16 {
            let report = self.run_pass(snapshots).await;
            failed += report.failed;
            if report.attempted == 0 {
                break;
            }
        }
        let status = if failed > 0 || !self.target_failures.is_empty() {
            SyncStatus::Error
        } else if Self::is_fully_synced(snapshots) {
            // The view predates this reconcile's copies; re-listing will
            // confirm convergence on the next change.
            SyncStatus::Synced
        } else {
            SyncStatus::Syncing
        };
        let message = self
            .target_failures
            .values()
            .any(|(class, _)| *class == FailureClass::Unauthorized)
            .then(|| "Connect a signer to continue syncing".to_string());
        self.publish(status, message);
    }

    fn publish(&self, status: SyncStatus, message: Option<String>) {
        let progress = self.log.progress_fraction(TransferKind::Sync);
        let view = SyncView {
            status,
            progress,
            message,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

struct CopyDone {
    id: Uuid,
    source: Blob,
    result: Result<CopyOutcome, CopyFailure>,
}

// ---------------------------------------------------------------------------
// Spawned wrapper
// ---------------------------------------------------------------------------

pub enum SyncCommand {
    StartSync,
    SetSigner(Option<Arc<dyn Signer>>),
    Shutdown,
}

pub struct SyncHandle {
    pub commands: mpsc::Sender<SyncCommand>,
    pub status: watch::Receiver<SyncView>,
}

/// Drive the engine from a snapshot watch channel: every published view
/// triggers a reconcile, and commands arrive over mpsc in the style of
/// the other spawned loops.
pub fn spawn_sync_engine(
    mut engine: SyncEngine,
    mut snapshots_rx: watch::Receiver<Vec<ServerSnapshot>>,
) -> SyncHandle {
    let (command_tx, mut command_rx) = mpsc::channel(16);
    let status = engine.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = snapshots_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = snapshots_rx.borrow_and_update().clone();
                    engine.reconcile(&view).await;
                }
                command = command_rx.recv() => match command {
                    Some(SyncCommand::StartSync) => {
                        engine.start_sync();
                        let view = snapshots_rx.borrow().clone();
                        engine.reconcile(&view).await;
                    }
                    Some(SyncCommand::SetSigner(signer)) => engine.set_signer(signer),
                    Some(SyncCommand::Shutdown) | None => break,
                },
            }
        }
    });
    SyncHandle {
        commands: command_tx,
        status,
    }
}
