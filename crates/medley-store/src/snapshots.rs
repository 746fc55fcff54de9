//! Typed CRUD for the snapshot cache table.
//!
//! Payloads are stored as a versioned JSON envelope.  The original
//! release persisted a bare camelCase blob array; those v1 payloads are
//! remapped on read and rewritten once under the current envelope.
//! Anything that parses as neither format is discarded as a cache miss.

use medley_shared::constants::SNAPSHOT_PAYLOAD_VERSION;
use medley_shared::{now_ts, CachedBlob, CachedSnapshot, ServerKind};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::Result;
use crate::traits::SnapshotStore;

/// Current on-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    blobs: Vec<CachedBlob>,
    updated_at: i64,
}

/// One entry of the legacy (v1) payload: a bare camelCase array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBlob {
    sha256: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "type")]
    mime_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uploaded: i64,
    url: String,
    #[serde(default)]
    requires_auth: bool,
    #[serde(default)]
    server_type: Option<ServerKind>,
}

impl From<LegacyBlob> for CachedBlob {
    fn from(legacy: LegacyBlob) -> Self {
        Self {
            sha256: legacy.sha256,
            size: legacy.size,
            mime_type: legacy.mime_type,
            name: legacy.name,
            uploaded: legacy.uploaded,
            url: legacy.url,
            requires_auth: legacy.requires_auth,
            server_kind: legacy.server_type,
            private_data: None,
        }
    }
}

impl Database {
    pub fn load_snapshot(&self, server_url: &str) -> Result<Option<CachedSnapshot>> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload, updated_at FROM snapshots WHERE server_url = ?1",
                    params![server_url],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?)
        })?;

        let Some((payload, row_updated_at)) = row else {
            return Ok(None);
        };

        if let Ok(envelope) = serde_json::from_str::<Envelope>(&payload) {
            if envelope.version == SNAPSHOT_PAYLOAD_VERSION {
                return Ok(Some(CachedSnapshot {
                    blobs: envelope.blobs,
                    updated_at: envelope.updated_at,
                }));
            }
        }

        if let Ok(legacy) = serde_json::from_str::<Vec<LegacyBlob>>(&payload) {
            tracing::info!(server = %server_url, "migrating v1 snapshot payload");
            let migrated = CachedSnapshot {
                blobs: legacy.into_iter().map(CachedBlob::from).collect(),
                updated_at: row_updated_at,
            };
            // Rewrite once under the current envelope; a failed rewrite
            // just means we migrate again next time.
            if let Err(e) = self.persist_snapshot(server_url, &migrated) {
                tracing::warn!(server = %server_url, error = %e, "failed to rewrite migrated snapshot");
            }
            return Ok(Some(migrated));
        }

        tracing::warn!(server = %server_url, "discarding malformed snapshot payload");
        self.delete_snapshot(server_url)?;
        Ok(None)
    }

    pub fn persist_snapshot(&self, server_url: &str, snapshot: &CachedSnapshot) -> Result<()> {
        let envelope = Envelope {
            version: SNAPSHOT_PAYLOAD_VERSION,
            blobs: snapshot.blobs.clone(),
            updated_at: snapshot.updated_at,
        };
        let payload = serde_json::to_string(&envelope)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO snapshots (server_url, payload, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![server_url, payload, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn delete_snapshot(&self, server_url: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM snapshots WHERE server_url = ?1",
                params![server_url],
            )?;
            Ok(())
        })
    }
}

impl SnapshotStore for Database {
    fn load(&self, server_url: &str) -> Result<Option<CachedSnapshot>> {
        self.load_snapshot(server_url)
    }

    fn persist(&self, server_url: &str, snapshot: &CachedSnapshot) -> Result<()> {
        self.persist_snapshot(server_url, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "https://cdn.example.com";

    fn cached_blob(n: u8) -> CachedBlob {
        CachedBlob {
            sha256: format!("{:02x}", n).repeat(32),
            size: Some(100 + n as u64),
            mime_type: Some("image/png".into()),
            name: Some(format!("file-{n}.png")),
            uploaded: 1_700_000_000 + n as i64,
            url: format!("{SERVER}/{n}"),
            requires_auth: false,
            server_kind: Some(ServerKind::Blossom),
            private_data: None,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let snapshot = CachedSnapshot {
            blobs: vec![cached_blob(1), cached_blob(2)],
            updated_at: 1_700_000_000,
        };

        db.persist_snapshot(SERVER, &snapshot).unwrap();
        let loaded = db.load_snapshot(SERVER).unwrap().expect("cached");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn legacy_payload_is_migrated_and_rewritten() {
        let db = Database::open_in_memory().unwrap();
        let legacy = format!(
            r#"[{{"sha256":"{}","size":4000000,"type":"audio/mpeg","name":"song.mp3","uploaded":1690000000,"url":"{SERVER}/x","requiresAuth":true,"serverType":"blossom"}}]"#,
            "ab".repeat(32)
        );
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots (server_url, payload, updated_at) VALUES (?1, ?2, ?3)",
                params![SERVER, legacy, 1_690_000_000_i64],
            )?;
            Ok(())
        })
        .unwrap();

        let loaded = db.load_snapshot(SERVER).unwrap().expect("migrated");
        assert_eq!(loaded.blobs.len(), 1);
        let blob = &loaded.blobs[0];
        assert_eq!(blob.mime_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(blob.name.as_deref(), Some("song.mp3"));
        assert!(blob.requires_auth);
        assert_eq!(blob.server_kind, Some(ServerKind::Blossom));

        // The rewrite happened: a second load parses the v2 envelope.
        let raw: String = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT payload FROM snapshots WHERE server_url = ?1",
                    params![SERVER],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(raw.contains("\"version\":2"));
    }

    #[test]
    fn malformed_payload_is_discarded() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots (server_url, payload, updated_at) VALUES (?1, ?2, ?3)",
                params![SERVER, "{not json", 0_i64],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(db.load_snapshot(SERVER).unwrap().is_none());
        // The poisoned row is gone.
        assert!(db.load_snapshot(SERVER).unwrap().is_none());
    }
}
