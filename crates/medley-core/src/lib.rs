//! # medley-core
//!
//! The engines behind the multi-server file manager: the metadata
//! overlay, the snapshot cache, the per-server fetch scheduler, blob
//! distribution and aggregation, automatic replication across linked
//! servers, and user-initiated transfers.
//!
//! Everything here is backend-agnostic; protocol specifics live behind
//! the [`medley_backend::BlobBackend`] trait.

pub mod cache;
pub mod copy;
pub mod distribution;
pub mod idle;
pub mod log;
pub mod overlay;
pub mod scheduler;
pub mod sync;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{CacheConfig, SnapshotCache};
pub use copy::{copy_blob, CopyFailure, CopyOutcome, FailureClass};
pub use distribution::{AggregateStats, BlobDistribution, DistributionEntry};
pub use idle::{BackgroundScheduler, IdleScheduler, TaskHandle, TimerScheduler};
pub use log::TransferLog;
pub use overlay::MetadataOverlay;
pub use scheduler::{spawn_scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle};
pub use sync::{spawn_sync_engine, SyncCommand, SyncConfig, SyncEngine, SyncHandle, SyncView};
pub use transfer::{TransferEngine, TransferReport};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default tracing subscriber for hosts that do not bring
/// their own.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("medley_core=debug,medley_store=info,medley_backend=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
