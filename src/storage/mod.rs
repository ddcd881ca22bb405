//! Storage module for persisting crawled content
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent item and child upserts (exactly one row per natural key)
//! - Per-source cursor persistence for resumption after restart
//! - A bounded pool of reusable storage connections

mod pool;
mod schema;
mod sqlite;

pub use pool::{PooledStore, StorePool};
pub use sqlite::SqliteStore;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cursor encoding error: {0}")]
    CursorEncoding(#[from] serde_json::Error),

    #[error("Connection pool closed")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One stored item row
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: i64,
    pub source: String,
    pub item_id: i64,
    pub payload: String,
    pub created_at: String,
    pub last_checked_at: String,
    pub dead: bool,
    pub placeholder: bool,
}

/// One stored child row
#[derive(Debug, Clone)]
pub struct ChildRow {
    pub id: i64,
    pub child_id: i64,
    pub parent_row_id: i64,
    pub payload: String,
    pub author: String,
    pub created_at: String,
    pub score: i64,
}

/// Inserted/updated counts from a child upsert batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Result of ingesting one item with its children
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    pub parent_row_id: i64,
    pub children: UpsertCounts,
}

/// Per-source row counts for status reporting
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub source: String,
    pub items: u64,
    pub children: u64,
    pub dead: u64,
    pub earliest_created: Option<String>,
    pub latest_created: Option<String>,
}

/// Formats a timestamp as fixed-width RFC 3339 UTC
///
/// Fixed width keeps lexicographic comparison in SQL consistent with
/// chronological order.
pub(crate) fn format_utc(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}
