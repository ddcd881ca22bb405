use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for boardwatch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chan: Option<ChanConfig>,
    #[serde(default)]
    pub reddit: Option<RedditConfig>,
    #[serde(rename = "source")]
    pub sources: Vec<SourceConfig>,
}

/// Scheduler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Delay between poll cycles for one source (seconds)
    #[serde(rename = "cycle-delay-secs")]
    pub cycle_delay_secs: u64,

    /// Maximum number of item detail fetches per cycle
    #[serde(rename = "fetch-cap")]
    pub fetch_cap: usize,
}

impl SchedulerConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }
}

/// Retry and backoff configuration
///
/// All values are tunable defaults, not fixed invariants.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Initial rate-limit backoff (seconds)
    #[serde(rename = "rate-limit-base-secs", default = "default_rate_limit_base")]
    pub rate_limit_base_secs: u64,

    /// Maximum rate-limit backoff (seconds)
    #[serde(rename = "rate-limit-cap-secs", default = "default_rate_limit_cap")]
    pub rate_limit_cap_secs: u64,

    /// Initial transient-failure backoff (seconds)
    #[serde(rename = "transient-base-secs", default = "default_transient_base")]
    pub transient_base_secs: u64,

    /// Number of retries for transient failures before giving up
    #[serde(rename = "transient-retries", default = "default_transient_retries")]
    pub transient_retries: u32,
}

fn default_rate_limit_base() -> u64 {
    1
}

fn default_rate_limit_cap() -> u64 {
    60
}

fn default_transient_base() -> u64 {
    2
}

fn default_transient_retries() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit_base_secs: default_rate_limit_base(),
            rate_limit_cap_secs: default_rate_limit_cap(),
            transient_base_secs: default_transient_base(),
            transient_retries: default_transient_retries(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Number of pooled storage connections
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    10
}

/// Imageboard adapter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChanConfig {
    /// Base API endpoint, e.g. "https://a.4cdn.org"
    pub endpoint: String,
}

/// Reddit adapter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    /// Base API endpoint, e.g. "https://oauth.reddit.com"
    pub endpoint: String,

    /// Token endpoint, e.g. "https://www.reddit.com/api/v1/access_token"
    #[serde(rename = "auth-endpoint")]
    pub auth_endpoint: String,

    #[serde(rename = "client-id")]
    pub client_id: String,

    #[serde(rename = "client-secret")]
    pub client_secret: String,

    pub username: String,

    pub password: String,

    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

/// Which adapter serves a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Chan,
    Reddit,
}

/// Which change-detection strategy a source's listing affords
///
/// Snapshot diffing suits non-chronological catalogs; a high-water-mark
/// cursor suits reverse-chronological feeds. The choice is per source and
/// must match the feed's listing semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionStrategy {
    Snapshot,
    HighWaterMark,
}

/// A monitored feed: one board or one subreddit
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Feed identity (board name, subreddit name)
    pub name: String,

    pub kind: SourceKind,

    pub strategy: DetectionStrategy,
}
