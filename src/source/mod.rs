//! Source adapters for monitored feeds
//!
//! A source adapter knows how to talk to one kind of upstream feed: listing
//! the currently visible items and fetching one item's full detail. All
//! loosely-typed JSON access lives at this boundary; the rest of the
//! pipeline only sees the narrow [`ListingSnapshot`] / [`ItemDetail`]
//! shapes. Failures are classified into [`FetchFailure`] so the retry
//! executor can apply the right policy.

mod chan;
mod reddit;

pub use chan::ChanAdapter;
pub use reddit::RedditAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

/// Classified failure from an adapter call
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("rate limited by upstream")]
    RateLimited,

    #[error("authentication expired")]
    AuthExpired,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// One item identifier visible in a listing, with its origin timestamp
/// when the feed provides one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// The set of item identifiers visible for one source at one poll instant
#[derive(Debug, Clone, Default)]
pub struct ListingSnapshot {
    pub entries: Vec<ListingEntry>,
}

impl ListingSnapshot {
    /// Item ids currently visible, as a set
    pub fn ids(&self) -> HashSet<i64> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// The newest origin timestamp observed in this listing
    pub fn max_created_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|e| e.created_at).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A reply/comment attached to an item
#[derive(Debug, Clone)]
pub struct ChildRecord {
    /// Natural key, unique within a source type
    pub child_id: i64,

    pub author: String,

    /// The child's own origin timestamp
    pub created_at: DateTime<Utc>,

    pub score: i64,

    /// Free-form content text
    pub body: String,

    /// Opaque structured payload as received upstream
    pub payload: serde_json::Value,
}

/// Normalized full detail for one item: the parent record plus its children
#[derive(Debug, Clone)]
pub struct ItemDetail {
    pub item_id: i64,

    /// The item's own origin timestamp
    pub created_at: DateTime<Utc>,

    /// Opaque structured payload as received upstream
    pub payload: serde_json::Value,

    pub children: Vec<ChildRecord>,
}

impl ItemDetail {
    /// Whether the detail carries no usable content at all
    pub fn is_empty(&self) -> bool {
        self.payload.is_null() && self.children.is_empty()
    }
}

/// Capability interface for one kind of upstream feed
///
/// Both calls are pure reads and safe to repeat; exactly-once semantics are
/// the storage layer's job, not the adapter's.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetches the listing of currently visible items for a source
    async fn fetch_listing(&self, source: &str) -> Result<ListingSnapshot, FetchFailure>;

    /// Fetches full detail (item plus children) for one item id
    async fn fetch_item(&self, source: &str, item_id: i64) -> Result<ItemDetail, FetchFailure>;

    /// Refreshes upstream credentials after an auth-expired failure
    ///
    /// Adapters without an auth handshake keep the default no-op.
    async fn reauthenticate(&self) -> Result<(), FetchFailure> {
        Ok(())
    }
}

/// Classifies an HTTP response status into a fetch failure
pub(crate) fn classify_status(status: reqwest::StatusCode) -> FetchFailure {
    use reqwest::StatusCode;

    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchFailure::RateLimited
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        FetchFailure::AuthExpired
    } else if status.is_server_error() {
        FetchFailure::Transient(format!("HTTP {}", status))
    } else {
        FetchFailure::Malformed(format!("HTTP {}", status))
    }
}

/// Classifies a transport-level reqwest error into a fetch failure
pub(crate) fn classify_transport_error(error: &reqwest::Error) -> FetchFailure {
    if error.is_decode() {
        FetchFailure::Malformed(error.to_string())
    } else {
        // Timeouts, connection refusals, and everything else at the
        // transport level are worth retrying.
        FetchFailure::Transient(error.to_string())
    }
}

/// Converts a unix epoch timestamp (seconds) to a UTC datetime
pub(crate) fn epoch_to_utc(secs: i64) -> Result<DateTime<Utc>, FetchFailure> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| FetchFailure::Malformed(format!("timestamp {} out of range", secs)))
}
