//! SQLite storage implementation
//!
//! All upserts resolve through the natural-key unique constraints, so
//! duplicate attempts — from a re-crawl or from concurrent source loops —
//! land on the same row. An item and its children ingest as one
//! transaction; any failure rolls the whole unit back.

use crate::detect::Cursor;
use crate::source::{ChildRecord, ItemDetail};
use crate::storage::schema::initialize_schema;
use crate::storage::{
    format_utc, ChildRow, IngestOutcome, ItemRow, SourceStats, StorageResult, UpsertCounts,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite storage backend
///
/// One `SqliteStore` owns one connection; concurrent access goes through
/// [`crate::storage::StorePool`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database at the given path
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Ingestion =====

    /// Ingests one item and its children as a single transactional unit
    ///
    /// The parent upsert commits (or a placeholder already exists) before
    /// children are written, because children reference the parent's row id.
    pub fn ingest(
        &mut self,
        source: &str,
        detail: &ItemDetail,
        observed_at: DateTime<Utc>,
    ) -> StorageResult<IngestOutcome> {
        let tx = self.conn.transaction()?;

        let parent_row_id = upsert_item_in(
            &tx,
            source,
            detail.item_id,
            &detail.payload.to_string(),
            detail.created_at,
            observed_at,
        )?;
        let children = upsert_children_in(&tx, parent_row_id, &detail.children)?;

        tx.commit()?;

        Ok(IngestOutcome {
            parent_row_id,
            children,
        })
    }

    /// Idempotently upserts one item by natural key, returning its row id
    ///
    /// Absent: inserted with `created_at` from the payload's intrinsic
    /// timestamp. Present: payload and `last_checked_at` update; `created_at`
    /// and the row id stay untouched (a placeholder row is the one exception:
    /// it adopts the real timestamp when reconciled).
    pub fn upsert_item(
        &mut self,
        source: &str,
        item_id: i64,
        payload: &str,
        created_at: DateTime<Utc>,
        observed_at: DateTime<Utc>,
    ) -> StorageResult<i64> {
        upsert_item_in(&self.conn, source, item_id, payload, created_at, observed_at)
    }

    /// Idempotently upserts children under the item with the given natural key
    ///
    /// If the parent row does not exist yet, a minimal placeholder item is
    /// synthesized first so the foreign-key invariant holds; the placeholder
    /// is reconciled in place when the real parent arrives.
    pub fn upsert_children(
        &mut self,
        source: &str,
        item_id: i64,
        children: &[ChildRecord],
        observed_at: DateTime<Utc>,
    ) -> StorageResult<UpsertCounts> {
        let tx = self.conn.transaction()?;

        let parent_row_id = ensure_parent_row(&tx, source, item_id, observed_at)?;
        let counts = upsert_children_in(&tx, parent_row_id, children)?;

        tx.commit()?;
        Ok(counts)
    }

    /// Marks items absent from the current listing as dead
    ///
    /// Disappearance is a signal, not a deletion trigger: rows are only
    /// flagged, never removed.
    pub fn mark_dead(&mut self, source: &str, item_ids: &[i64]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut flagged = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE items SET dead = 1 WHERE source = ?1 AND item_id = ?2")?;
            for item_id in item_ids {
                flagged += stmt.execute(params![source, item_id])?;
            }
        }
        tx.commit()?;
        Ok(flagged)
    }

    // ===== Cursor persistence =====

    /// Loads the persisted cursor for a source, if any
    pub fn load_cursor(&self, source: &str) -> StorageResult<Option<Cursor>> {
        let encoded: Option<String> = self
            .conn
            .query_row(
                "SELECT cursor FROM crawl_state WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?;

        match encoded {
            Some(encoded) => Ok(Some(serde_json::from_str(&encoded)?)),
            None => Ok(None),
        }
    }

    /// Persists the cursor for a source
    pub fn save_cursor(
        &mut self,
        source: &str,
        cursor: &Cursor,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let encoded = serde_json::to_string(cursor)?;
        self.conn.execute(
            "INSERT INTO crawl_state (source, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor,
                                               updated_at = excluded.updated_at",
            params![source, encoded, format_utc(updated_at)],
        )?;
        Ok(())
    }

    // ===== Queries =====

    /// Fetches one item row by natural key
    pub fn get_item(&self, source: &str, item_id: i64) -> StorageResult<Option<ItemRow>> {
        let item = self
            .conn
            .query_row(
                "SELECT id, source, item_id, payload, created_at, last_checked_at, dead, placeholder
                 FROM items WHERE source = ?1 AND item_id = ?2",
                params![source, item_id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Counts item rows for one natural key (always 0 or 1 by constraint)
    pub fn count_rows_for(&self, source: &str, item_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE source = ?1 AND item_id = ?2",
            params![source, item_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Fetches the children of an item row, ordered by child id
    pub fn children_of(&self, parent_row_id: i64) -> StorageResult<Vec<ChildRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, child_id, parent_row_id, payload, author, created_at, score
             FROM children WHERE parent_row_id = ?1 ORDER BY child_id",
        )?;

        let children = stmt
            .query_map(params![parent_row_id], |row| {
                Ok(ChildRow {
                    id: row.get(0)?,
                    child_id: row.get(1)?,
                    parent_row_id: row.get(2)?,
                    payload: row.get(3)?,
                    author: row.get(4)?,
                    created_at: row.get(5)?,
                    score: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(children)
    }

    /// Per-source row counts for the status report
    pub fn stats(&self) -> StorageResult<Vec<SourceStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.source,
                    COUNT(DISTINCT i.id),
                    COUNT(c.id),
                    COUNT(DISTINCT CASE WHEN i.dead = 1 THEN i.id END),
                    MIN(i.created_at),
                    MAX(i.created_at)
             FROM items i LEFT JOIN children c ON c.parent_row_id = i.id
             GROUP BY i.source ORDER BY i.source",
        )?;

        let stats = stmt
            .query_map([], |row| {
                Ok(SourceStats {
                    source: row.get(0)?,
                    items: row.get::<_, i64>(1)? as u64,
                    children: row.get::<_, i64>(2)? as u64,
                    dead: row.get::<_, i64>(3)? as u64,
                    earliest_created: row.get(4)?,
                    latest_created: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }
}

/// Upserts one item row, resolving duplicates through the natural-key
/// constraint so the operation is safe under concurrent attempts
fn upsert_item_in(
    conn: &Connection,
    source: &str,
    item_id: i64,
    payload: &str,
    created_at: DateTime<Utc>,
    observed_at: DateTime<Utc>,
) -> StorageResult<i64> {
    let row_id: i64 = conn.query_row(
        "INSERT INTO items (source, item_id, payload, created_at, last_checked_at, dead, placeholder)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0)
         ON CONFLICT(source, item_id) DO UPDATE SET
             payload = excluded.payload,
             last_checked_at = MAX(items.last_checked_at, excluded.last_checked_at),
             created_at = CASE WHEN items.placeholder = 1
                               THEN excluded.created_at
                               ELSE items.created_at END,
             dead = 0,
             placeholder = 0
         RETURNING id",
        params![
            source,
            item_id,
            payload,
            format_utc(created_at),
            format_utc(observed_at)
        ],
        |row| row.get(0),
    )?;
    Ok(row_id)
}

/// Returns the parent row id for a natural key, synthesizing a minimal
/// placeholder item if no row exists yet
fn ensure_parent_row(
    conn: &Connection,
    source: &str,
    item_id: i64,
    observed_at: DateTime<Utc>,
) -> StorageResult<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM items WHERE source = ?1 AND item_id = ?2",
            params![source, item_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    tracing::warn!(source, item_id, "parent not seen yet, creating placeholder");

    let now = format_utc(observed_at);
    let row_id: i64 = conn.query_row(
        "INSERT INTO items (source, item_id, payload, created_at, last_checked_at, dead, placeholder)
         VALUES (?1, ?2, '{}', ?3, ?3, 0, 1)
         ON CONFLICT(source, item_id) DO UPDATE SET item_id = items.item_id
         RETURNING id",
        params![source, item_id, now],
        |row| row.get(0),
    )?;
    Ok(row_id)
}

/// Upserts a batch of children under an existing parent row
///
/// Absent children insert with their intrinsic `created_at`; present
/// children update payload only.
fn upsert_children_in(
    conn: &Connection,
    parent_row_id: i64,
    children: &[ChildRecord],
) -> StorageResult<UpsertCounts> {
    let mut counts = UpsertCounts::default();

    let mut probe = conn.prepare("SELECT 1 FROM children WHERE child_id = ?1")?;
    let mut insert = conn.prepare(
        "INSERT INTO children (child_id, parent_row_id, payload, author, created_at, score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(child_id) DO UPDATE SET payload = excluded.payload",
    )?;

    for child in children {
        let exists = probe
            .query_row(params![child.child_id], |_| Ok(()))
            .optional()?
            .is_some();

        insert.execute(params![
            child.child_id,
            parent_row_id,
            child.payload.to_string(),
            child.author,
            format_utc(child.created_at),
            child.score,
        ])?;

        if exists {
            counts.updated += 1;
        } else {
            counts.inserted += 1;
        }
    }

    Ok(counts)
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        source: row.get(1)?,
        item_id: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
        last_checked_at: row.get(5)?,
        dead: row.get::<_, i64>(6)? != 0,
        placeholder: row.get::<_, i64>(7)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn child(id: i64, body: &str, secs: i64) -> ChildRecord {
        ChildRecord {
            child_id: id,
            author: "anon".to_string(),
            created_at: at(secs),
            score: 0,
            body: body.to_string(),
            payload: json!({ "no": id, "com": body }),
        }
    }

    fn detail(item_id: i64, text: &str, children: Vec<ChildRecord>) -> ItemDetail {
        ItemDetail {
            item_id,
            created_at: at(1_000),
            payload: json!({ "no": item_id, "com": text }),
            children,
        }
    }

    #[test]
    fn test_upsert_item_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = store
            .upsert_item("pol", 100, r#"{"com":"v1"}"#, at(1_000), at(2_000))
            .unwrap();
        let second = store
            .upsert_item("pol", 100, r#"{"com":"v2"}"#, at(1_000), at(3_000))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_rows_for("pol", 100).unwrap(), 1);

        let row = store.get_item("pol", 100).unwrap().unwrap();
        assert!(row.payload.contains("v2"));
        assert_eq!(row.created_at, format_utc(at(1_000)));
        assert_eq!(row.last_checked_at, format_utc(at(3_000)));
    }

    #[test]
    fn test_created_at_immutable_across_recrawls() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store
            .upsert_item("pol", 100, "{}", at(1_000), at(2_000))
            .unwrap();
        // A re-fetch reporting a different intrinsic timestamp must not move it
        store
            .upsert_item("pol", 100, "{}", at(9_999), at(3_000))
            .unwrap();

        let row = store.get_item("pol", 100).unwrap().unwrap();
        assert_eq!(row.created_at, format_utc(at(1_000)));
    }

    #[test]
    fn test_last_checked_at_monotonic() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store
            .upsert_item("pol", 100, "{}", at(1_000), at(5_000))
            .unwrap();
        // An out-of-order observation must not regress the watermark
        store
            .upsert_item("pol", 100, "{}", at(1_000), at(4_000))
            .unwrap();

        let row = store.get_item("pol", 100).unwrap().unwrap();
        assert_eq!(row.last_checked_at, format_utc(at(5_000)));
    }

    #[test]
    fn test_ingest_stores_parent_and_children() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let outcome = store
            .ingest(
                "pol",
                &detail(100, "op", vec![child(201, "first", 1_100), child(202, "second", 1_200)]),
                at(2_000),
            )
            .unwrap();

        assert_eq!(
            outcome.children,
            UpsertCounts {
                inserted: 2,
                updated: 0
            }
        );

        let children = store.children_of(outcome.parent_row_id).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].child_id, 201);
        assert_eq!(children[0].created_at, format_utc(at(1_100)));
    }

    #[test]
    fn test_reingest_updates_children_without_deleting() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = store
            .ingest(
                "pol",
                &detail(100, "op", vec![child(201, "first", 1_100)]),
                at(2_000),
            )
            .unwrap();

        // Second crawl sees one more reply
        let second = store
            .ingest(
                "pol",
                &detail(
                    100,
                    "op",
                    vec![child(201, "first edited", 1_100), child(202, "second", 1_200)],
                ),
                at(3_000),
            )
            .unwrap();

        assert_eq!(first.parent_row_id, second.parent_row_id);
        assert_eq!(
            second.children,
            UpsertCounts {
                inserted: 1,
                updated: 1
            }
        );

        let children = store.children_of(first.parent_row_id).unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[0].payload.contains("first edited"));
    }

    #[test]
    fn test_orphan_child_synthesizes_placeholder() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let counts = store
            .upsert_children("pol", 500, &[child(601, "early reply", 1_100)], at(2_000))
            .unwrap();
        assert_eq!(counts.inserted, 1);

        let placeholder = store.get_item("pol", 500).unwrap().unwrap();
        assert!(placeholder.placeholder);
        assert_eq!(store.count_rows_for("pol", 500).unwrap(), 1);

        // The real parent arrives later and reconciles the same row
        let outcome = store
            .ingest("pol", &detail(500, "the real op", vec![]), at(3_000))
            .unwrap();

        assert_eq!(outcome.parent_row_id, placeholder.id);
        assert_eq!(store.count_rows_for("pol", 500).unwrap(), 1);

        let reconciled = store.get_item("pol", 500).unwrap().unwrap();
        assert!(!reconciled.placeholder);
        assert!(reconciled.payload.contains("the real op"));
        // Placeholder adopts the real intrinsic timestamp
        assert_eq!(reconciled.created_at, format_utc(at(1_000)));

        // The orphan child still hangs off the reconciled row
        let children = store.children_of(outcome.parent_row_id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].child_id, 601);
    }

    #[test]
    fn test_mark_dead_flags_without_deleting() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store
            .ingest("pol", &detail(100, "op", vec![]), at(2_000))
            .unwrap();
        let flagged = store.mark_dead("pol", &[100, 999]).unwrap();

        // 999 was never stored, so only one row is flagged
        assert_eq!(flagged, 1);
        let row = store.get_item("pol", 100).unwrap().unwrap();
        assert!(row.dead);

        // A resurrected item clears the flag
        store
            .ingest("pol", &detail(100, "op", vec![]), at(3_000))
            .unwrap();
        assert!(!store.get_item("pol", 100).unwrap().unwrap().dead);
    }

    #[test]
    fn test_cursor_roundtrip() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        assert!(store.load_cursor("pol").unwrap().is_none());

        let cursor = Cursor::Snapshot {
            ids: [1, 2, 3].into_iter().collect(),
        };
        store.save_cursor("pol", &cursor, at(2_000)).unwrap();
        assert_eq!(store.load_cursor("pol").unwrap(), Some(cursor));

        // Overwrite with the next cycle's cursor
        let next = Cursor::Snapshot {
            ids: [2, 3, 4].into_iter().collect(),
        };
        store.save_cursor("pol", &next, at(3_000)).unwrap();
        assert_eq!(store.load_cursor("pol").unwrap(), Some(next));
    }

    #[test]
    fn test_stats_counts_per_source() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store
            .ingest("pol", &detail(100, "a", vec![child(201, "r", 1_100)]), at(2_000))
            .unwrap();
        store
            .ingest("pol", &detail(101, "b", vec![]), at(2_000))
            .unwrap();
        store
            .ingest("sci", &detail(300, "c", vec![]), at(2_000))
            .unwrap();
        store.mark_dead("pol", &[101]).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.len(), 2);

        let pol = stats.iter().find(|s| s.source == "pol").unwrap();
        assert_eq!(pol.items, 2);
        assert_eq!(pol.children, 1);
        assert_eq!(pol.dead, 1);
        assert!(pol.earliest_created.is_some());
    }
}
