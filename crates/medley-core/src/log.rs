//! Transfer activity feed.
//!
//! Every copy operation from either engine reports into one shared
//! [`TransferLog`].  Entries are ephemeral UI state, capped to the most
//! recent [`medley_shared::constants::TRANSFER_LOG_CAP`].

use std::sync::Mutex;

use medley_shared::constants::TRANSFER_LOG_CAP;
use medley_shared::{TransferKind, TransferState, TransferStatus};
use tokio::sync::watch;
use uuid::Uuid;

pub struct TransferLog {
    inner: Mutex<Vec<TransferState>>,
    tx: watch::Sender<Vec<TransferState>>,
}

impl Default for TransferLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferLog {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            inner: Mutex::new(Vec::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<TransferState>> {
        self.tx.subscribe()
    }

    pub fn entries(&self) -> Vec<TransferState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Register a new transfer and return its id.
    pub fn begin(
        &self,
        kind: TransferKind,
        server_url: &str,
        file_name: &str,
        total: u64,
    ) -> Uuid {
        let entry = TransferState::new(kind, server_url.to_string(), file_name.to_string(), total);
        let id = entry.id;
        self.mutate(|entries| {
            entries.push(entry);
            if entries.len() > TRANSFER_LOG_CAP {
                let excess = entries.len() - TRANSFER_LOG_CAP;
                entries.drain(..excess);
            }
        });
        id
    }

    pub fn start_upload(&self, id: Uuid) {
        self.update(id, |entry| entry.status = TransferStatus::Uploading);
    }

    pub fn progress(&self, id: Uuid, transferred: u64, total: u64) {
        self.update(id, |entry| {
            entry.transferred = transferred;
            if total > 0 {
                entry.total = total;
            }
            entry.status = TransferStatus::Uploading;
        });
    }

    pub fn succeed(&self, id: Uuid, message: Option<String>) {
        self.update(id, |entry| {
            entry.status = TransferStatus::Success;
            entry.transferred = entry.transferred.max(entry.total);
            entry.message = message;
        });
    }

    /// The error message is attached verbatim; classification for retry
    /// policy happens elsewhere.
    pub fn fail(&self, id: Uuid, message: String) {
        self.update(id, |entry| {
            entry.status = TransferStatus::Error;
            entry.message = Some(message);
        });
    }

    /// Fraction of expected bytes moved across in-flight-or-succeeded
    /// transfers of the given kind.  `1.0` when nothing is pending.
    pub fn progress_fraction(&self, kind: TransferKind) -> f32 {
        let entries = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut transferred = 0u64;
        let mut expected = 0u64;
        for entry in entries.iter() {
            if entry.kind != kind || entry.status == TransferStatus::Error {
                continue;
            }
            transferred += entry.transferred.min(entry.total);
            expected += entry.total;
        }
        if expected == 0 {
            1.0
        } else {
            transferred as f32 / expected as f32
        }
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut TransferState)) {
        self.mutate(|entries| {
            if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                f(entry);
            }
        });
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<TransferState>)) {
        let mut entries = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut entries);
        let _ = self.tx.send(entries.clone());
    }
}
