//! Boardwatch: a forum feed crawler and archiver
//!
//! This crate continuously monitors forum-style content feeds (imageboard
//! catalogs, link aggregators), detects new and vanished items, fetches full
//! item detail, and records everything exactly once per natural identity —
//! resilient to restarts, duplicate re-fetches, and upstream rate limiting.

pub mod config;
pub mod crawler;
pub mod detect;
pub mod retry;
pub mod source;
pub mod storage;

use thiserror::Error;

/// Main error type for boardwatch operations
#[derive(Debug, Error)]
pub enum BoardwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failure for {source}: {failure}")]
    Fetch {
        source: String,
        #[source]
        failure: source::FetchFailure,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Cursor serialization error: {0}")]
    CursorEncoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
}

/// Result type alias for boardwatch operations
pub type Result<T, E = BoardwatchError> = std::result::Result<T, E>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use detect::{detect_changes, ChangeSet, Cursor};
pub use retry::{RetryPolicy, RetryingAdapter};
pub use source::{ChildRecord, FetchFailure, ItemDetail, ListingSnapshot, SourceAdapter};
