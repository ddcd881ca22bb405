//! Configuration module for boardwatch
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files. Every tunable the crawler consumes — source list, cycle delay,
//! fetch cap, backoff constants, pool size — comes from here; nothing is
//! hardcoded in the crawl logic.

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChanConfig, Config, DetectionStrategy, RedditConfig, RetryConfig, SchedulerConfig,
    SourceConfig, SourceKind, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
