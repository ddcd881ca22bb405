//! Crawl orchestration
//!
//! This module drives the poll-diff-fetch-ingest cycle:
//! - Item detail fetching and normalization
//! - Per-source scheduling, cycle accounting, and graceful shutdown

mod fetcher;
mod scheduler;

pub use fetcher::fetch_detail;
pub use scheduler::{CycleSummary, SourceCrawler};
