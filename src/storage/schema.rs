//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the boardwatch
//! database. Natural-key uniqueness is enforced here so concurrent
//! duplicate upserts resolve through constraint conflict handling rather
//! than cross-item locks.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Top-level content units, one row per (source, item_id)
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    item_id INTEGER NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_checked_at TEXT NOT NULL,
    dead INTEGER NOT NULL DEFAULT 0,
    placeholder INTEGER NOT NULL DEFAULT 0,
    UNIQUE(source, item_id)
);

CREATE INDEX IF NOT EXISTS idx_items_source ON items(source);
CREATE INDEX IF NOT EXISTS idx_items_dead ON items(source, dead);

-- Replies/comments, one row per child_id
CREATE TABLE IF NOT EXISTS children (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    child_id INTEGER NOT NULL UNIQUE,
    parent_row_id INTEGER NOT NULL REFERENCES items(id),
    payload TEXT NOT NULL,
    author TEXT NOT NULL,
    created_at TEXT NOT NULL,
    score INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_children_parent ON children(parent_row_id);

-- Per-source crawl cursor, enabling resumption after restart
CREATE TABLE IF NOT EXISTS crawl_state (
    source TEXT PRIMARY KEY,
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// Idempotent; safe to run against an already-initialized database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_natural_key_unique() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO items (source, item_id, payload, created_at, last_checked_at)
             VALUES ('pol', 100, '{}', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO items (source, item_id, payload, created_at, last_checked_at)
             VALUES ('pol', 100, '{}', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
