//! v003 -- Tombstones for deleted profiles, so a still-valid session token
//! cannot silently recreate them.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS deleted_users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID
    deleted_at TEXT NOT NULL                -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
