//! v001 -- Session key-value table.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    key        TEXT PRIMARY KEY NOT NULL,   -- "token" | "current_user"
    value      TEXT NOT NULL,               -- raw token or JSON document
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
