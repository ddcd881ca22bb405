//! Per-source crawl loop
//!
//! Each configured source runs its own loop: poll the listing, diff it
//! against the persisted cursor, fetch and ingest changed items, flag the
//! vanished ones, then persist the advanced cursor. The cursor is written
//! last so a crash mid-cycle re-examines the same window instead of
//! skipping it.

use crate::config::{DetectionStrategy, SourceConfig};
use crate::crawler::fetcher::fetch_detail;
use crate::detect::{detect_changes, Cursor};
use crate::source::SourceAdapter;
use crate::storage::StorePool;
use crate::{BoardwatchError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Counters for one completed crawl cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Items visible in the listing this cycle
    pub discovered: usize,

    /// Items not present in the previous cursor
    pub new: usize,

    /// Items that vanished since the previous cursor
    pub dead: usize,

    /// Detail fetches that succeeded
    pub fetched: usize,

    /// Items ingested into storage
    pub stored: usize,

    /// Items skipped after a fetch or ingest failure
    pub failed: usize,
}

/// Drives the crawl loop for a single configured source
pub struct SourceCrawler<A> {
    name: String,
    strategy: DetectionStrategy,
    adapter: Arc<A>,
    pool: StorePool,
    cycle_delay: Duration,
    fetch_cap: usize,
}

impl<A: SourceAdapter> SourceCrawler<A> {
    pub fn new(
        source: &SourceConfig,
        adapter: Arc<A>,
        pool: StorePool,
        cycle_delay: Duration,
        fetch_cap: usize,
    ) -> Self {
        Self {
            name: source.name.clone(),
            strategy: source.strategy,
            adapter,
            pool,
            cycle_delay,
            fetch_cap,
        }
    }

    /// Runs cycles until shutdown is signalled
    ///
    /// A failed cycle is logged and the loop continues; per-source outages
    /// must not take the whole process down.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.cycle().await {
                Ok(summary) => {
                    tracing::info!(
                        source = %self.name,
                        discovered = summary.discovered,
                        new = summary.new,
                        dead = summary.dead,
                        stored = summary.stored,
                        failed = summary.failed,
                        "cycle complete"
                    );
                }
                Err(error) => {
                    tracing::error!(source = %self.name, %error, "cycle failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cycle_delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!(source = %self.name, "crawl loop stopped");
    }

    /// Executes one poll-diff-fetch-ingest cycle
    pub async fn cycle(&self) -> Result<CycleSummary> {
        let cursor = self.load_or_initial_cursor().await?;

        let listing = self
            .adapter
            .fetch_listing(&self.name)
            .await
            .map_err(|failure| BoardwatchError::Fetch {
                source: self.name.clone(),
                failure,
            })?;

        let changes = detect_changes(&cursor, &listing);
        tracing::debug!(
            source = %self.name,
            discovered = listing.len(),
            new = changes.new.len(),
            dead = changes.dead.len(),
            "listing diffed"
        );

        let mut summary = CycleSummary {
            discovered: listing.len(),
            new: changes.new.len(),
            dead: changes.dead.len(),
            ..CycleSummary::default()
        };

        // One bad item never aborts the cycle; it is logged, counted, and
        // picked up again on a later pass.
        for &item_id in changes.to_fetch.iter().take(self.fetch_cap) {
            match fetch_detail(self.adapter.as_ref(), &self.name, item_id).await {
                Ok(detail) => {
                    summary.fetched += 1;
                    let mut store = self.pool.acquire().await?;
                    match store.ingest(&self.name, &detail, Utc::now()) {
                        Ok(outcome) => {
                            summary.stored += 1;
                            tracing::debug!(
                                source = %self.name,
                                item_id,
                                children_inserted = outcome.children.inserted,
                                children_updated = outcome.children.updated,
                                "item ingested"
                            );
                        }
                        Err(error) => {
                            summary.failed += 1;
                            tracing::warn!(source = %self.name, item_id, %error, "ingest failed");
                        }
                    }
                }
                Err(failure) => {
                    summary.failed += 1;
                    tracing::warn!(source = %self.name, item_id, %failure, "item fetch failed");
                }
            }
        }

        if !changes.dead.is_empty() {
            let dead: Vec<i64> = changes.dead.iter().copied().collect();
            let mut store = self.pool.acquire().await?;
            let flagged = store.mark_dead(&self.name, &dead)?;
            tracing::info!(source = %self.name, flagged, "vanished items flagged");
        }

        // Persisting the cursor is the last step of the cycle: everything
        // before it may safely run twice.
        let mut store = self.pool.acquire().await?;
        store.save_cursor(&self.name, &changes.next, Utc::now())?;

        Ok(summary)
    }

    async fn load_or_initial_cursor(&self) -> Result<Cursor> {
        let store = self.pool.acquire().await?;
        Ok(store
            .load_cursor(&self.name)?
            .unwrap_or_else(|| Cursor::initial(self.strategy)))
    }
}
