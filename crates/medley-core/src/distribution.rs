//! Distribution and aggregation engine.
//!
//! Pure: recomputed from the current set of server snapshots, no network
//! or storage I/O.  Snapshots must be folded in configured-server order
//! so the documented first-seen tie-break is deterministic.

use std::collections::HashMap;

use medley_shared::{Blob, ServerSnapshot};

/// Where one logical blob lives across servers, and its best-known
/// metadata variant.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionEntry {
    /// The variant with the highest completeness score among
    /// contributors; ties keep the earliest-seen variant.
    pub blob: Blob,
    /// Every server URL whose snapshot included this hash, deduplicated,
    /// in first-seen order.
    pub servers: Vec<String>,
}

/// Content-hash-keyed union of every server's listing.
#[derive(Debug, Default)]
pub struct BlobDistribution {
    entries: HashMap<String, DistributionEntry>,
    /// First-seen hash order, the crate-wide iteration order.
    order: Vec<String>,
}

/// Aggregate view over the chosen variants.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStats {
    /// Distinct hash count.
    pub count: usize,
    /// Sum of the chosen variant's size per hash, not across replicas.
    pub size: u64,
    /// Max upload timestamp across chosen variants.
    pub last_change: i64,
    pub blobs: Vec<Blob>,
}

impl BlobDistribution {
    /// Fold every snapshot, in the given (configured-server) order.
    pub fn build(snapshots: &[ServerSnapshot]) -> Self {
        let mut dist = Self::default();
        for snapshot in snapshots {
            dist.merge_snapshot(snapshot);
        }
        dist
    }

    pub fn merge_snapshot(&mut self, snapshot: &ServerSnapshot) {
        for blob in &snapshot.blobs {
            self.fold(&snapshot.server.url, blob);
        }
    }

    fn fold(&mut self, server_url: &str, blob: &Blob) {
        match self.entries.get_mut(&blob.sha256) {
            None => {
                self.order.push(blob.sha256.clone());
                self.entries.insert(
                    blob.sha256.clone(),
                    DistributionEntry {
                        blob: blob.clone(),
                        servers: vec![server_url.to_string()],
                    },
                );
            }
            Some(entry) => {
                if !entry.servers.iter().any(|s| s == server_url) {
                    entry.servers.push(server_url.to_string());
                }
                // Strictly-greater keeps ties on the earliest-seen variant.
                if blob.completeness_score() > entry.blob.completeness_score() {
                    entry.blob = blob.clone();
                }
            }
        }
    }

    pub fn get(&self, sha256: &str) -> Option<&DistributionEntry> {
        self.entries.get(sha256)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in first-seen hash order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DistributionEntry)> {
        self.order
            .iter()
            .filter_map(|hash| self.entries.get(hash).map(|e| (hash.as_str(), e)))
    }

    pub fn aggregate(&self) -> AggregateStats {
        let mut size = 0u64;
        let mut last_change = 0i64;
        let mut blobs = Vec::with_capacity(self.order.len());
        for (_, entry) in self.iter() {
            size += entry.blob.size.unwrap_or(0);
            last_change = last_change.max(entry.blob.uploaded);
            blobs.push(entry.blob.clone());
        }
        AggregateStats {
            count: blobs.len(),
            size,
            last_change,
            blobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use medley_shared::{Server, ServerKind};

    use super::*;

    fn server(url: &str) -> Server {
        Server {
            url: url.to_string(),
            kind: ServerKind::Blossom,
            requires_auth: false,
            sync: true,
            name: url.to_string(),
        }
    }

    fn snapshot(url: &str, blobs: Vec<Blob>) -> ServerSnapshot {
        ServerSnapshot {
            server: server(url),
            blobs,
            is_loading: false,
            is_error: false,
            error: None,
        }
    }

    fn blob(hash: &str, name: Option<&str>, mime: Option<&str>, size: Option<u64>) -> Blob {
        Blob {
            sha256: hash.repeat(32),
            size,
            mime_type: mime.map(String::from),
            name: name.map(String::from),
            uploaded: 1_690_000_000,
            url: format!("https://x/{hash}"),
            server_url: None,
            requires_auth: false,
            server_kind: Some(ServerKind::Blossom),
            folder_path: None,
            private_data: None,
        }
    }

    #[test]
    fn merging_the_same_list_twice_is_idempotent() {
        let snap = snapshot("https://a", vec![blob("ab", Some("x"), None, Some(10))]);
        let mut dist = BlobDistribution::build(&[snap.clone()]);
        dist.merge_snapshot(&snap);

        let entry = dist.get(&"ab".repeat(32)).unwrap();
        assert_eq!(entry.servers, vec!["https://a".to_string()]);
        assert_eq!(dist.len(), 1);
        assert_eq!(dist.aggregate().count, 1);
    }

    #[test]
    fn best_variant_is_score_based_not_order_based() {
        let incomplete = blob("ab", Some("x"), None, Some(10));
        let complete = blob("ab", Some("song.mp3"), Some("audio/mpeg"), Some(10));

        let forward = BlobDistribution::build(&[
            snapshot("https://a", vec![incomplete.clone()]),
            snapshot("https://b", vec![complete.clone()]),
        ]);
        let reverse = BlobDistribution::build(&[
            snapshot("https://b", vec![complete.clone()]),
            snapshot("https://a", vec![incomplete.clone()]),
        ]);

        let hash = "ab".repeat(32);
        assert_eq!(forward.get(&hash).unwrap().blob.name.as_deref(), Some("song.mp3"));
        assert_eq!(reverse.get(&hash).unwrap().blob.name.as_deref(), Some("song.mp3"));
    }

    #[test]
    fn true_ties_keep_the_first_seen_variant() {
        let first = blob("ab", Some("First.png"), Some("image/png"), Some(10));
        let second = blob("ab", Some("second.png"), Some("image/png"), Some(10));

        let dist = BlobDistribution::build(&[
            snapshot("https://a", vec![first]),
            snapshot("https://b", vec![second]),
        ]);
        assert_eq!(
            dist.get(&"ab".repeat(32)).unwrap().blob.name.as_deref(),
            Some("First.png")
        );
    }

    #[test]
    fn replica_metadata_from_two_servers_is_unified() {
        // Server A has full metadata; server B only knows the hash.
        let hash = "ab".repeat(32);
        let a = Blob {
            name: Some("song.mp3".into()),
            mime_type: Some("audio/mpeg".into()),
            size: Some(4_000_000),
            ..blob("ab", None, None, None)
        };
        let b = Blob {
            name: Some(hash.clone()),
            mime_type: None,
            ..blob("ab", None, None, None)
        };

        let dist = BlobDistribution::build(&[
            snapshot("https://a", vec![a]),
            snapshot("https://b", vec![b]),
        ]);

        let entry = dist.get(&hash).unwrap();
        assert_eq!(entry.blob.name.as_deref(), Some("song.mp3"));
        assert_eq!(entry.blob.mime_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(
            entry.servers,
            vec!["https://a".to_string(), "https://b".to_string()]
        );
    }

    #[test]
    fn aggregate_counts_each_hash_once() {
        let shared = blob("ab", Some("a"), Some("image/png"), Some(100));
        let only_b = blob("cd", Some("b"), Some("image/png"), Some(50));

        let dist = BlobDistribution::build(&[
            snapshot("https://a", vec![shared.clone()]),
            snapshot("https://b", vec![shared, only_b]),
        ]);
        let stats = dist.aggregate();
        assert_eq!(stats.count, 2);
        // 100 + 50, not 100 * 2 + 50.
        assert_eq!(stats.size, 150);
        assert_eq!(stats.last_change, 1_690_000_000);
    }
}
