//! Per-server fetch scheduler.
//!
//! Keeps a bounded set of servers "active" (listing in flight or
//! recently listed), queues the rest, and opportunistically prefetches
//! untouched servers while the app is idle.  Publishes the combined
//! view as a watch channel of [`ServerSnapshot`]s in configured order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use medley_backend::{BackendRegistry, Signer};
use medley_shared::constants::{
    MAX_CONCURRENT_QUERIES, PREFETCH_BASE_DELAY_MS, PREFETCH_MIN_DELAY_MS,
};
use medley_shared::{is_sha256_hex, now_ts, Blob, MetadataPatch, Patch, Server, ServerSnapshot};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::SnapshotCache;
use crate::idle::{BackgroundScheduler, TaskHandle};
use crate::overlay::MetadataOverlay;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrent listing ceiling for non-prioritized admission.
    pub max_concurrent_queries: usize,
    /// Base delay between background prefetches; jittered per arm.
    pub prefetch_base_delay: Duration,
    /// Initial network toggle state.
    pub network_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: MAX_CONCURRENT_QUERIES,
            prefetch_base_delay: Duration::from_millis(PREFETCH_BASE_DELAY_MS),
            network_enabled: true,
        }
    }
}

pub enum SchedulerCommand {
    /// Replace the configured server list.
    SetServers(Vec<Server>),
    /// Change the server the user is currently looking at.
    SetForeground(Option<String>),
    /// Explicit user request to fetch one server now.
    ActivateServer(String),
    SetSigner(Option<Arc<dyn Signer>>),
    SetNetworkEnabled(bool),
    /// App visibility; prefetch only runs while visible.
    SetVisible(bool),
    Shutdown,
}

/// Channel endpoints for talking to a spawned scheduler.
pub struct SchedulerHandle {
    pub commands: mpsc::Sender<SchedulerCommand>,
    pub snapshots: watch::Receiver<Vec<ServerSnapshot>>,
}

pub fn spawn_scheduler(
    registry: BackendRegistry,
    overlay: Arc<MetadataOverlay>,
    cache: Arc<SnapshotCache>,
    idle: Arc<dyn BackgroundScheduler>,
    config: SchedulerConfig,
) -> SchedulerHandle {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (snapshots_tx, snapshots_rx) = watch::channel(Vec::new());
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (activate_tx, activate_rx) = mpsc::unbounded_channel();
    let network_enabled = config.network_enabled;
    let scheduler = FetchScheduler {
        registry,
        overlay,
        cache,
        idle,
        config,
        servers: Vec::new(),
        foreground: None,
        signer: None,
        network_enabled,
        visible: true,
        admission: AdmissionState::default(),
        generation: 0,
        tasks: HashMap::new(),
        snapshots: HashMap::new(),
        fetched: HashSet::new(),
        prefetch: None,
        snapshots_tx,
        outcome_tx,
        activate_tx,
    };
    tokio::spawn(scheduler.run(command_rx, outcome_rx, activate_rx));
    SchedulerHandle {
        commands: command_tx,
        snapshots: snapshots_rx,
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Pure admission bookkeeping: which servers hold a fetch slot and which
/// wait in FIFO order.  Prioritized servers (foreground, sync-enabled)
/// may push the active set past the configured ceiling; ordinary
/// admission never does.
#[derive(Debug, Default)]
pub(crate) struct AdmissionState {
    active: Vec<String>,
    queued: VecDeque<String>,
}

impl AdmissionState {
    pub(crate) fn active(&self) -> &[String] {
        &self.active
    }

    pub(crate) fn is_active(&self, url: &str) -> bool {
        self.active.iter().any(|u| u == url)
    }

    fn is_queued(&self, url: &str) -> bool {
        self.queued.iter().any(|u| u == url)
    }

    /// Recompute admission after the inputs changed.  Returns the URLs
    /// that were newly admitted and should start fetching.
    pub(crate) fn update(
        &mut self,
        servers: &[Server],
        prioritized: &[String],
        ceiling: usize,
    ) -> Vec<String> {
        let configured: HashSet<&str> = servers.iter().map(|s| s.url.as_str()).collect();
        let effective = ceiling.max(prioritized.len());

        self.active.retain(|u| configured.contains(u.as_str()));
        self.queued.retain(|u| configured.contains(u.as_str()));

        let mut admitted = Vec::new();
        for url in prioritized {
            if !configured.contains(url.as_str()) || self.is_active(url) {
                continue;
            }
            if self.active.len() < effective {
                self.queued.retain(|u| u != url);
                self.active.push(url.clone());
                admitted.push(url.clone());
            } else if !self.is_queued(url) {
                self.queued.push_back(url.clone());
            }
        }

        // Demote overflow: prioritized slots survive first, then the
        // earliest ordinary slots fill up to the effective ceiling.
        if self.active.len() > effective {
            let prioritized_set: HashSet<&str> =
                prioritized.iter().map(String::as_str).collect();
            let mut keep = Vec::new();
            let mut ordinary = Vec::new();
            for url in self.active.drain(..) {
                if prioritized_set.contains(url.as_str()) {
                    keep.push(url);
                } else {
                    ordinary.push(url);
                }
            }
            let mut demoted = Vec::new();
            for url in ordinary {
                if keep.len() < effective {
                    keep.push(url);
                } else {
                    demoted.push(url);
                }
            }
            self.active = keep;
            for url in demoted.into_iter().rev() {
                if !self.is_queued(&url) {
                    self.queued.push_front(url);
                }
            }
            admitted.retain(|u| self.is_active(u));
        }

        admitted.extend(self.fill(ceiling));
        admitted
    }

    /// FIFO-dequeue while there is spare capacity under the ceiling.
    fn fill(&mut self, ceiling: usize) -> Vec<String> {
        let mut admitted = Vec::new();
        while self.active.len() < ceiling {
            match self.queued.pop_front() {
                Some(url) => {
                    if !self.is_active(&url) {
                        self.active.push(url.clone());
                        admitted.push(url);
                    }
                }
                None => break,
            }
        }
        admitted
    }

    /// Free a slot after its fetch settled and admit waiters.
    pub(crate) fn release(&mut self, url: &str, ceiling: usize) -> Vec<String> {
        self.active.retain(|u| u != url);
        self.fill(ceiling)
    }

    /// Activate one server directly, bypassing the queue.
    pub(crate) fn admit(&mut self, url: &str) -> bool {
        if self.is_active(url) {
            return false;
        }
        self.queued.retain(|u| u != url);
        self.active.push(url.to_string());
        true
    }

    /// Configured servers that are neither active nor queued.
    fn untouched<'a>(&self, servers: &'a [Server]) -> Vec<&'a Server> {
        servers
            .iter()
            .filter(|s| !self.is_active(&s.url) && !self.is_queued(&s.url))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct FetchOutcome {
    generation: u64,
    server_url: String,
    result: Result<Vec<Blob>, String>,
}

struct FetchScheduler {
    registry: BackendRegistry,
    overlay: Arc<MetadataOverlay>,
    cache: Arc<SnapshotCache>,
    idle: Arc<dyn BackgroundScheduler>,
    config: SchedulerConfig,
    servers: Vec<Server>,
    foreground: Option<String>,
    signer: Option<Arc<dyn Signer>>,
    network_enabled: bool,
    visible: bool,
    admission: AdmissionState,
    /// Bumped whenever servers, signer or network toggle change; results
    /// tagged with an older generation are discarded on arrival.
    generation: u64,
    tasks: HashMap<String, JoinHandle<()>>,
    snapshots: HashMap<String, ServerSnapshot>,
    /// Servers already listed this session, so prefetch moves on.
    fetched: HashSet<String>,
    prefetch: Option<TaskHandle>,
    snapshots_tx: watch::Sender<Vec<ServerSnapshot>>,
    outcome_tx: mpsc::UnboundedSender<FetchOutcome>,
    activate_tx: mpsc::UnboundedSender<String>,
}

impl FetchScheduler {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        mut outcome_rx: mpsc::UnboundedReceiver<FetchOutcome>,
        mut activate_rx: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(outcome) = outcome_rx.recv() => self.handle_outcome(outcome),
                Some(url) = activate_rx.recv() => self.handle_prefetch(url),
            }
        }
        if let Some(handle) = self.prefetch.take() {
            handle.cancel();
        }
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::SetServers(servers) => {
                let configured: HashSet<String> =
                    servers.iter().map(|s| s.url.clone()).collect();
                self.tasks.retain(|url, task| {
                    let keep = configured.contains(url);
                    if !keep {
                        task.abort();
                    }
                    keep
                });
                self.snapshots.retain(|url, _| configured.contains(url));
                self.servers = servers;
                for server in self.servers.clone() {
                    self.hydrate(&server);
                }
                self.recompute();
            }
            SchedulerCommand::SetForeground(url) => {
                self.foreground = url;
                self.recompute();
            }
            SchedulerCommand::ActivateServer(url) => {
                if !self.servers.iter().any(|s| s.url == url) {
                    return;
                }
                self.admission.admit(&url);
                if !self.try_start_fetch(&url) {
                    let next = self
                        .admission
                        .release(&url, self.config.max_concurrent_queries);
                    self.pump(next);
                }
                self.publish();
            }
            SchedulerCommand::SetSigner(signer) => {
                self.generation += 1;
                self.signer = signer;
                // Unauthenticated listings are still valid; gated ones
                // should be retried with (or without) the new signer.
                let ungated: HashSet<String> = self
                    .servers
                    .iter()
                    .filter(|s| !s.needs_signer())
                    .map(|s| s.url.clone())
                    .collect();
                self.fetched.retain(|url| ungated.contains(url));
                for (_, task) in self.tasks.drain() {
                    task.abort();
                }
                self.admission = AdmissionState::default();
                self.recompute();
            }
            SchedulerCommand::SetNetworkEnabled(enabled) => {
                if self.network_enabled == enabled {
                    return;
                }
                self.generation += 1;
                self.network_enabled = enabled;
                for (_, task) in self.tasks.drain() {
                    task.abort();
                }
                for snapshot in self.snapshots.values_mut() {
                    snapshot.is_loading = false;
                }
                if enabled {
                    self.fetched.clear();
                    self.admission = AdmissionState::default();
                    self.recompute();
                } else {
                    if let Some(handle) = self.prefetch.take() {
                        handle.cancel();
                    }
                    self.publish();
                }
            }
            SchedulerCommand::SetVisible(visible) => {
                self.visible = visible;
                if visible {
                    self.arm_prefetch();
                } else if let Some(handle) = self.prefetch.take() {
                    handle.cancel();
                }
            }
            SchedulerCommand::Shutdown => {}
        }
    }

    /// Foreground first, then sync-enabled servers, deduplicated.
    fn prioritized(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(foreground) = &self.foreground {
            if self.servers.iter().any(|s| &s.url == foreground) {
                out.push(foreground.clone());
            }
        }
        for server in &self.servers {
            if server.sync && !out.contains(&server.url) {
                out.push(server.url.clone());
            }
        }
        out
    }

    fn recompute(&mut self) {
        let prioritized = self.prioritized();
        let admitted = self.admission.update(
            &self.servers,
            &prioritized,
            self.config.max_concurrent_queries,
        );
        self.pump(admitted);
        self.publish();
        self.arm_prefetch();
    }

    /// Start fetches for newly admitted servers; a server that turns out
    /// not to need a fetch releases its slot to the next in line.
    fn pump(&mut self, mut to_start: Vec<String>) {
        while let Some(url) = to_start.pop() {
            if !self.try_start_fetch(&url) {
                let next = self
                    .admission
                    .release(&url, self.config.max_concurrent_queries);
                to_start.extend(next);
            }
        }
    }

    /// Returns true when a listing task was spawned (or is already in
    /// flight) and the admission slot stays held.
    fn try_start_fetch(&mut self, url: &str) -> bool {
        let Some(server) = self.servers.iter().find(|s| s.url == url).cloned() else {
            return false;
        };
        if self.tasks.contains_key(url) {
            return true;
        }
        if !self.network_enabled {
            return false;
        }
        if server.needs_signer() && self.signer.is_none() {
            debug!(server = %url, "no signer connected, serving cached listing");
            return false;
        }

        let entry = self
            .snapshots
            .entry(url.to_string())
            .or_insert_with(|| ServerSnapshot::new(server.clone()));
        entry.is_loading = true;
        entry.is_error = false;
        entry.error = None;

        let generation = self.generation;
        let registry = self.registry.clone();
        let signer = self.signer.clone();
        let outcome_tx = self.outcome_tx.clone();
        let task = tokio::spawn(async move {
            let result = match registry.for_server(&server) {
                Ok(backend) => backend
                    .list_blobs(&server, signer.as_deref())
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = outcome_tx.send(FetchOutcome {
                generation,
                server_url: server.url,
                result,
            });
        });
        self.tasks.insert(url.to_string(), task);
        true
    }

    fn handle_outcome(&mut self, outcome: FetchOutcome) {
        self.tasks.remove(&outcome.server_url);
        let url = outcome.server_url;
        if outcome.generation == self.generation {
            self.fetched.insert(url.clone());
            match outcome.result {
                Ok(blobs) => {
                    let blobs = self.merge_overlay(&url, blobs);
                    if let Some(server) = self.servers.iter().find(|s| s.url == url).cloned() {
                        self.snapshots.insert(
                            url.clone(),
                            ServerSnapshot {
                                server,
                                blobs: blobs.clone(),
                                is_loading: false,
                                is_error: false,
                                error: None,
                            },
                        );
                    }
                    self.cache.persist(&url, &blobs);
                }
                Err(message) => {
                    warn!(server = %url, error = %message, "listing failed");
                    if let Some(snapshot) = self.snapshots.get_mut(&url) {
                        // Keep the previously shown blobs; just flag the error.
                        snapshot.is_loading = false;
                        snapshot.is_error = true;
                        snapshot.error = Some(message);
                    }
                }
            }
            self.publish();
        }
        // The slot is freed even for a stale result, otherwise a
        // generation bump racing a settled fetch would leak it.
        let next = self
            .admission
            .release(&url, self.config.max_concurrent_queries);
        self.pump(next);
        self.arm_prefetch();
    }

    /// Overlay wins for display fields; server-provided metadata the
    /// overlay has never seen is written back as a discovery.  Listing
    /// entries without a plausible content hash are dropped outright.
    fn merge_overlay(&self, server_url: &str, mut blobs: Vec<Blob>) -> Vec<Blob> {
        blobs.retain(|b| is_sha256_hex(&b.sha256) && !b.is_empty_marker());
        for blob in &mut blobs {
            let discovered_name = blob.name.clone();
            let discovered_mime = blob.mime_type.clone();
            if let Some(meta) = self.overlay.get(server_url, &blob.sha256) {
                if meta.name.is_some() {
                    blob.name = meta.name.clone();
                }
                if meta.mime_type.is_some() {
                    blob.mime_type = meta.mime_type.clone();
                }
                if meta.folder_path.is_some() {
                    blob.folder_path = meta.folder_path.clone();
                }
            }
            if self.overlay.is_fresh(server_url, &blob.sha256) {
                continue;
            }
            let mut patch = MetadataPatch {
                last_checked_at: Some(now_ts()),
                ..MetadataPatch::default()
            };
            if let Some(name) = discovered_name {
                patch.name = Patch::Set(name);
            }
            if let Some(mime) = discovered_mime {
                patch.mime_type = Patch::Set(mime);
            }
            self.overlay.set_batched(server_url, &blob.sha256, patch);
        }
        blobs
    }

    /// Seed a snapshot from the persisted cache so a server shows its
    /// last known listing before (or instead of) a live fetch.
    fn hydrate(&mut self, server: &Server) {
        if self.snapshots.contains_key(&server.url) {
            return;
        }
        let blobs = self
            .cache
            .load(&server.url)
            .map(|cached| {
                cached
                    .blobs
                    .into_iter()
                    .map(|b| b.into_blob(server))
                    .collect()
            })
            .unwrap_or_default();
        let mut snapshot = ServerSnapshot::new(server.clone());
        snapshot.blobs = blobs;
        self.snapshots.insert(server.url.clone(), snapshot);
    }

    /// Publish the combined view in configured server order.
    fn publish(&self) {
        let view: Vec<ServerSnapshot> = self
            .servers
            .iter()
            .filter_map(|s| self.snapshots.get(&s.url).cloned())
            .collect();
        let _ = self.snapshots_tx.send(view);
    }

    /// Arm one deferred prefetch for the next untouched server, if any.
    fn arm_prefetch(&mut self) {
        if !self.visible || !self.network_enabled || self.prefetch.is_some() {
            return;
        }
        if self.admission.active().len() >= self.config.max_concurrent_queries {
            return;
        }
        let candidate = self
            .admission
            .untouched(&self.servers)
            .into_iter()
            .find(|s| {
                !self.fetched.contains(&s.url)
                    && !self.tasks.contains_key(&s.url)
                    && !(s.needs_signer() && self.signer.is_none())
            })
            .map(|s| s.url.clone());
        let Some(url) = candidate else {
            return;
        };
        let delay = jittered_delay(self.config.prefetch_base_delay);
        let activate_tx = self.activate_tx.clone();
        self.prefetch = Some(self.idle.schedule(
            delay,
            Box::new(move || {
                let _ = activate_tx.send(url);
            }),
        ));
    }

    fn handle_prefetch(&mut self, url: String) {
        self.prefetch = None;
        let still_wanted = self.servers.iter().any(|s| s.url == url)
            && !self.admission.is_active(&url)
            && !self.fetched.contains(&url)
            && self.admission.active().len() < self.config.max_concurrent_queries;
        if still_wanted {
            self.admission.admit(&url);
            if !self.try_start_fetch(&url) {
                let next = self
                    .admission
                    .release(&url, self.config.max_concurrent_queries);
                self.pump(next);
            }
            self.publish();
        }
        self.arm_prefetch();
    }
}

/// Randomize a prefetch delay to 50..=150% of the base, floored so the
/// scheduler never spins.
pub(crate) fn jittered_delay(base: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.5);
    let millis = (base.as_millis() as f64 * factor) as u64;
    Duration::from_millis(millis.max(PREFETCH_MIN_DELAY_MS))
}
