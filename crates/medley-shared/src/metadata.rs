//! Metadata overlay records and the merge-patch algebra applied to them.
//!
//! A [`StoredMetadata`] row is keyed by `(scope, sha256)` where the scope
//! is either a server URL or [`crate::constants::GLOBAL_SCOPE`].  Reads
//! reconcile the server-scoped row with the global row field by field,
//! most recent `updated_at` winning.

use serde::{Deserialize, Serialize};

use crate::constants::METADATA_FRESH_TTL_SECS;

// ---------------------------------------------------------------------------
// Audio tags
// ---------------------------------------------------------------------------

/// Audio tags extracted at upload time or entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

impl AudioMetadata {
    /// Normalize tags so equality comparisons are stable: strings are
    /// trimmed (empty after trim means absent) and non-positive integers
    /// are dropped.  Returns `None` when nothing survives.
    pub fn normalized(self) -> Option<Self> {
        let trim = |s: Option<String>| {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let positive = |n: Option<u32>| n.filter(|v| *v > 0);

        let out = Self {
            title: trim(self.title),
            artist: trim(self.artist),
            album: trim(self.album),
            track: positive(self.track),
            duration_secs: positive(self.duration_secs),
        };
        if out == Self::default() {
            None
        } else {
            Some(out)
        }
    }
}

// ---------------------------------------------------------------------------
// Stored metadata
// ---------------------------------------------------------------------------

/// One metadata overlay row.  All fields optional; deletion of a field is
/// expressed through [`Patch::Clear`] on a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioMetadata>,
    /// Virtual folder path; `None` means root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    /// Unix timestamp of the last user-visible change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Unix timestamp of the last network probe.  Only used to avoid
    /// redundant probes; never shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<i64>,
}

impl StoredMetadata {
    /// Whether the row carries nothing worth persisting.  `updated_at`
    /// alone does not keep a row alive; `last_checked_at` does, because
    /// it is what suppresses redundant probes.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.mime_type.is_none()
            && self.audio.is_none()
            && self.folder_path.is_none()
            && self.last_checked_at.is_none()
    }

    /// Whether a network metadata probe can be skipped: both name and type
    /// are already known, or a probe happened within the TTL.
    pub fn is_fresh(&self, now: i64) -> bool {
        self.is_fresh_with_ttl(now, METADATA_FRESH_TTL_SECS)
    }

    pub fn is_fresh_with_ttl(&self, now: i64, ttl_secs: i64) -> bool {
        if self.name.is_some() && self.mime_type.is_some() {
            return true;
        }
        match self.last_checked_at {
            Some(checked) => now - checked < ttl_secs,
            None => false,
        }
    }

    /// Reconcile a server-scoped row with the global row.
    ///
    /// Per field, the row with the more recent `updated_at` wins; a row
    /// without a timestamp loses to one with a timestamp.
    pub fn reconcile(server: Option<&Self>, global: Option<&Self>) -> Option<Self> {
        match (server, global) {
            (None, None) => None,
            (Some(s), None) => Some(s.clone()),
            (None, Some(g)) => Some(g.clone()),
            (Some(s), Some(g)) => {
                let (newer, older) = if g.updated_at.unwrap_or(0) > s.updated_at.unwrap_or(0) {
                    (g, s)
                } else {
                    (s, g)
                };
                Some(Self {
                    name: newer.name.clone().or_else(|| older.name.clone()),
                    mime_type: newer.mime_type.clone().or_else(|| older.mime_type.clone()),
                    audio: newer.audio.clone().or_else(|| older.audio.clone()),
                    folder_path: newer
                        .folder_path
                        .clone()
                        .or_else(|| older.folder_path.clone()),
                    updated_at: newer.updated_at.or(older.updated_at),
                    last_checked_at: match (s.last_checked_at, g.last_checked_at) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    },
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Merge patch
// ---------------------------------------------------------------------------

/// Three-state field update: leave untouched, clear, or overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Preserve the prior value.
    #[default]
    Keep,
    /// Delete the prior value.
    Clear,
    /// Overwrite with a concrete value.
    Set(T),
}

impl<T: Clone> Patch<T> {
    fn apply(&self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = None,
            Patch::Set(v) => *slot = Some(v.clone()),
        }
    }

    /// Combine with a later patch for the same key; the later patch's
    /// non-`Keep` fields win.
    fn then(self, later: Self) -> Self {
        match later {
            Patch::Keep => self,
            other => other,
        }
    }
}

/// A merge-patch for one `(scope, sha256)` metadata row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub name: Patch<String>,
    pub mime_type: Patch<String>,
    pub audio: Patch<AudioMetadata>,
    pub folder_path: Patch<String>,
    /// New `updated_at`, if this write is user-visible.
    pub updated_at: Option<i64>,
    /// New `last_checked_at`, if this write records a probe.
    pub last_checked_at: Option<i64>,
}

impl MetadataPatch {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Apply this patch on top of an existing row.  Audio tags are
    /// normalized on every write.
    pub fn apply_to(&self, base: &StoredMetadata) -> StoredMetadata {
        let mut out = base.clone();
        self.name.apply(&mut out.name);
        self.mime_type.apply(&mut out.mime_type);
        self.audio.apply(&mut out.audio);
        self.folder_path.apply(&mut out.folder_path);
        out.audio = out.audio.take().and_then(AudioMetadata::normalized);
        if let Some(ts) = self.updated_at {
            out.updated_at = Some(ts);
        }
        if let Some(ts) = self.last_checked_at {
            out.last_checked_at = Some(ts);
        }
        out
    }

    /// Coalesce with a later same-tick patch for the same key.
    pub fn merge(self, later: Self) -> Self {
        Self {
            name: self.name.then(later.name),
            mime_type: self.mime_type.then(later.mime_type),
            audio: self.audio.then(later.audio),
            folder_path: self.folder_path.then(later.folder_path),
            updated_at: later.updated_at.or(self.updated_at),
            last_checked_at: later.last_checked_at.or(self.last_checked_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_patch_preserves_omitted_fields() {
        let base = StoredMetadata::default();
        let with_name = MetadataPatch {
            name: Patch::Set("X".into()),
            ..Default::default()
        }
        .apply_to(&base);
        let with_both = MetadataPatch {
            mime_type: Patch::Set("Y".into()),
            ..Default::default()
        }
        .apply_to(&with_name);

        assert_eq!(with_both.name.as_deref(), Some("X"));
        assert_eq!(with_both.mime_type.as_deref(), Some("Y"));
    }

    #[test]
    fn clear_deletes_a_field() {
        let base = MetadataPatch {
            name: Patch::Set("X".into()),
            ..Default::default()
        }
        .apply_to(&StoredMetadata::default());

        let cleared = MetadataPatch {
            name: Patch::Clear,
            ..Default::default()
        }
        .apply_to(&base);

        assert_eq!(cleared.name, None);
    }

    #[test]
    fn audio_tags_are_normalized_on_write() {
        let patch = MetadataPatch {
            audio: Patch::Set(AudioMetadata {
                title: Some("  Song  ".into()),
                artist: Some("   ".into()),
                track: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let out = patch.apply_to(&StoredMetadata::default());
        let audio = out.audio.expect("tags survive");
        assert_eq!(audio.title.as_deref(), Some("Song"));
        assert_eq!(audio.artist, None);
        assert_eq!(audio.track, None);
    }

    #[test]
    fn fully_blank_audio_collapses_to_none() {
        let patch = MetadataPatch {
            audio: Patch::Set(AudioMetadata {
                title: Some("  ".into()),
                track: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(patch.apply_to(&StoredMetadata::default()).audio, None);
    }

    #[test]
    fn reconcile_prefers_most_recent_per_field() {
        let server = StoredMetadata {
            name: Some("server.png".into()),
            updated_at: Some(100),
            ..Default::default()
        };
        let global = StoredMetadata {
            name: Some("alias.png".into()),
            mime_type: Some("image/png".into()),
            updated_at: Some(200),
            ..Default::default()
        };
        let merged = StoredMetadata::reconcile(Some(&server), Some(&global)).unwrap();
        assert_eq!(merged.name.as_deref(), Some("alias.png"));
        assert_eq!(merged.mime_type.as_deref(), Some("image/png"));

        // Flip the timestamps: server alias wins, global fills gaps.
        let server = StoredMetadata {
            updated_at: Some(300),
            ..server
        };
        let merged = StoredMetadata::reconcile(Some(&server), Some(&global)).unwrap();
        assert_eq!(merged.name.as_deref(), Some("server.png"));
        assert_eq!(merged.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn freshness_requires_complete_metadata_or_recent_probe() {
        let complete = StoredMetadata {
            name: Some("a".into()),
            mime_type: Some("image/png".into()),
            ..Default::default()
        };
        assert!(complete.is_fresh(1_000_000));

        let probed = StoredMetadata {
            last_checked_at: Some(1_000_000 - 60),
            ..Default::default()
        };
        assert!(probed.is_fresh(1_000_000));

        let stale = StoredMetadata {
            last_checked_at: Some(0),
            ..Default::default()
        };
        assert!(!stale.is_fresh(1_000_000));
        assert!(!StoredMetadata::default().is_fresh(1_000_000));
    }

    #[test]
    fn later_patch_wins_when_coalescing() {
        let first = MetadataPatch {
            name: Patch::Set("old".into()),
            mime_type: Patch::Set("image/png".into()),
            ..Default::default()
        };
        let second = MetadataPatch {
            name: Patch::Set("new".into()),
            ..Default::default()
        };
        let merged = first.merge(second);
        assert_eq!(merged.name, Patch::Set("new".into()));
        assert_eq!(merged.mime_type, Patch::Set("image/png".into()));
    }
}
