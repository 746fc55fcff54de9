//! v002 -- Track metadata probe times.
//!
//! Adds `last_checked_at` to the metadata table so the fetch layer can
//! skip redundant network probes without rewriting user-visible fields.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE metadata ADD COLUMN last_checked_at INTEGER;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
