//! Typed CRUD for the metadata overlay table.

use medley_shared::{AudioMetadata, StoredMetadata};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::traits::MetadataStore;

impl Database {
    pub fn get_metadata(&self, scope: &str, sha256: &str) -> Result<Option<StoredMetadata>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT name, mime_type, audio, folder_path, updated_at, last_checked_at
                     FROM metadata
                     WHERE scope = ?1 AND sha256 = ?2",
                    params![scope, sha256],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                            row.get::<_, Option<i64>>(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((name, mime_type, audio_json, folder_path, updated_at, last_checked_at)) = row
            else {
                return Ok(None);
            };

            // A corrupt audio payload degrades to "no tags" rather than an error.
            let audio = audio_json
                .as_deref()
                .and_then(|json| serde_json::from_str::<AudioMetadata>(json).ok());

            Ok(Some(StoredMetadata {
                name,
                mime_type,
                audio,
                folder_path,
                updated_at,
                last_checked_at,
            }))
        })
    }

    pub fn put_metadata(&self, scope: &str, sha256: &str, meta: &StoredMetadata) -> Result<()> {
        self.with_conn(|conn| {
            if meta.is_empty() {
                conn.execute(
                    "DELETE FROM metadata WHERE scope = ?1 AND sha256 = ?2",
                    params![scope, sha256],
                )?;
                return Ok(());
            }

            let audio_json = meta
                .audio
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            conn.execute(
                "INSERT OR REPLACE INTO metadata
                     (scope, sha256, name, mime_type, audio, folder_path, updated_at, last_checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    scope,
                    sha256,
                    meta.name,
                    meta.mime_type,
                    audio_json,
                    meta.folder_path,
                    meta.updated_at,
                    meta.last_checked_at,
                ],
            )?;
            Ok(())
        })
    }
}

impl MetadataStore for Database {
    fn get(&self, scope: &str, sha256: &str) -> Result<Option<StoredMetadata>> {
        self.get_metadata(scope, sha256)
    }

    fn put(&self, scope: &str, sha256: &str, metadata: &StoredMetadata) -> Result<()> {
        self.put_metadata(scope, sha256, metadata)
    }
}
