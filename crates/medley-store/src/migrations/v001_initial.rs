//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: the `metadata` overlay and the
//! `snapshots` cache.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Metadata overlay
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS metadata (
    scope       TEXT NOT NULL,     -- server URL, or 'global' for aliases
    sha256      TEXT NOT NULL,     -- 64-hex content hash
    name        TEXT,
    mime_type   TEXT,
    audio       TEXT,              -- JSON-encoded audio tags
    folder_path TEXT,              -- virtual folder overlay, NULL = root
    updated_at  INTEGER,           -- unix seconds of last user-visible change

    PRIMARY KEY (scope, sha256)
);

CREATE INDEX IF NOT EXISTS idx_metadata_sha256 ON metadata(sha256);

-- ----------------------------------------------------------------
-- Snapshot cache
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS snapshots (
    server_url TEXT PRIMARY KEY NOT NULL,
    payload    TEXT NOT NULL,      -- versioned JSON envelope
    updated_at INTEGER NOT NULL    -- unix seconds of the write
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
