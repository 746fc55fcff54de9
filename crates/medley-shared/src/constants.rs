/// Scope key under which cross-server metadata aliases are stored.
///
/// An alias written to this scope (e.g. a user-assigned display name)
/// follows the content hash regardless of which server a blob is viewed on.
pub const GLOBAL_SCOPE: &str = "global";

/// Sentinel MIME type used by servers as an empty-marker object.
///
/// Listings containing this type are placeholders (e.g. folder keep-alive
/// markers), not real files, and are filtered out of every snapshot.
pub const EMPTY_MARKER_MIME: &str = "application/vnd.medley.empty-marker";

/// How long a metadata probe result stays fresh (12 hours).
pub const METADATA_FRESH_TTL_SECS: i64 = 12 * 60 * 60;

/// Maximum blobs persisted per server snapshot under normal operation.
pub const SNAPSHOT_CACHE_CAP: usize = 400;

/// Reduced cap applied after any persistence attempt has failed
/// (typically a storage quota error).  Sticky for the session.
pub const SNAPSHOT_CACHE_EMERGENCY_CAP: usize = 100;

/// Current version of the persisted snapshot payload envelope.
pub const SNAPSHOT_PAYLOAD_VERSION: u32 = 2;

/// Maximum number of servers fetched over the network simultaneously.
pub const MAX_CONCURRENT_QUERIES: usize = 2;

/// Maximum concurrent blob copy operations across all (target, hash) pairs.
pub const MAX_CONCURRENT_COPIES: usize = 3;

/// Base delay before a background prefetch activates an idle server.
/// The actual delay is jittered to 50-150% of this value.
pub const PREFETCH_BASE_DELAY_MS: u64 = 2_000;

/// Lower bound on the jittered prefetch delay.
pub const PREFETCH_MIN_DELAY_MS: u64 = 250;

/// Debounce window for snapshot cache writes.
pub const PERSIST_DEBOUNCE_MS: u64 = 500;

/// Upper bound on how long idle-scheduled work may be deferred.
pub const IDLE_TIMEOUT_MS: u64 = 1_000;

/// Cooldown after a successful copy before the pair is re-checked.
pub const COOLDOWN_DONE_SECS: u64 = 30;

/// Cooldown after a transient copy failure.
pub const COOLDOWN_RETRYABLE_SECS: u64 = 2 * 60;

/// Cooldown after a permanent copy failure (unauthorized, mirror
/// unsupported, network blocked).
pub const COOLDOWN_PERMANENT_SECS: u64 = 30 * 60;

/// Maximum entries retained in the transfer activity log.
pub const TRANSFER_LOG_CAP: usize = 50;
