//! Boardwatch main entry point
//!
//! This is the command-line interface for the boardwatch feed crawler.

use boardwatch::config::{load_config_with_hash, Config, SourceKind};
use boardwatch::crawler::SourceCrawler;
use boardwatch::retry::{RetryPolicy, RetryingAdapter};
use boardwatch::source::{ChanAdapter, RedditAdapter, SourceAdapter};
use boardwatch::storage::{SqliteStore, StorePool};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Boardwatch: a forum feed crawler and archiver
///
/// Boardwatch polls forum-style feeds (imageboard catalogs, link
/// aggregators), detects new and vanished items, and archives every item
/// and its replies exactly once per natural identity.
#[derive(Parser, Debug)]
#[command(name = "boardwatch")]
#[command(version = "1.0.0")]
#[command(about = "A forum feed crawler and archiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show per-source statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("boardwatch=info,warn"),
            1 => EnvFilter::new("boardwatch=debug,info"),
            2 => EnvFilter::new("boardwatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Boardwatch Dry Run ===\n");

    println!("Scheduler:");
    println!("  Cycle delay: {}s", config.scheduler.cycle_delay_secs);
    println!("  Fetch cap per cycle: {}", config.scheduler.fetch_cap);

    println!("\nRetry policy:");
    println!(
        "  Rate limit backoff: {}s doubling, capped at {}s",
        config.retry.rate_limit_base_secs, config.retry.rate_limit_cap_secs
    );
    println!(
        "  Transient: {} retries, {}s doubling",
        config.retry.transient_retries, config.retry.transient_base_secs
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Pool size: {}", config.storage.pool_size);

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!(
            "  - {} ({:?}, {:?} detection)",
            source.name, source.kind, source.strategy
        );
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would crawl {} sources", config.sources.len());
}

/// Handles the --stats mode: prints per-source row counts
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.storage.database_path);

    let store = SqliteStore::open(Path::new(&config.storage.database_path))?;
    let stats = store.stats()?;

    if stats.is_empty() {
        println!("No items stored yet.");
        return Ok(());
    }

    for entry in &stats {
        println!("{}:", entry.source);
        println!("  Items: {} ({} dead)", entry.items, entry.dead);
        println!("  Children: {}", entry.children);
        if let (Some(earliest), Some(latest)) = (&entry.earliest_created, &entry.latest_created) {
            println!("  Created range: {} .. {}", earliest, latest);
        }
    }

    Ok(())
}

/// Handles the main crawl operation: one loop per configured source
async fn handle_crawl(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool = StorePool::open(
        Path::new(&config.storage.database_path),
        config.storage.pool_size,
    )?;
    let policy = RetryPolicy::new(&config.retry);
    let cycle_delay = config.scheduler.cycle_delay();
    let fetch_cap = config.scheduler.fetch_cap;

    // One adapter per source kind, shared by every source of that kind.
    // Validation guarantees the matching config section exists.
    let chan = config
        .chan
        .as_ref()
        .map(|cfg| ChanAdapter::new(cfg).map(|a| Arc::new(RetryingAdapter::new(a, policy.clone()))))
        .transpose()?;
    let reddit = config
        .reddit
        .as_ref()
        .map(|cfg| {
            RedditAdapter::new(cfg).map(|a| Arc::new(RetryingAdapter::new(a, policy.clone())))
        })
        .transpose()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for source in &config.sources {
        tracing::info!(source = %source.name, kind = ?source.kind, "starting crawl loop");
        match source.kind {
            SourceKind::Chan => {
                let adapter = chan.clone().ok_or("imageboard section missing")?;
                tasks.push(spawn_loop(
                    source,
                    adapter,
                    pool.clone(),
                    cycle_delay,
                    fetch_cap,
                    shutdown_rx.clone(),
                ));
            }
            SourceKind::Reddit => {
                let adapter = reddit.clone().ok_or("reddit section missing")?;
                tasks.push(spawn_loop(
                    source,
                    adapter,
                    pool.clone(),
                    cycle_delay,
                    fetch_cap,
                    shutdown_rx.clone(),
                ));
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping crawl loops");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("All crawl loops stopped");
    Ok(())
}

fn spawn_loop<A: SourceAdapter + 'static>(
    source: &boardwatch::config::SourceConfig,
    adapter: Arc<A>,
    pool: StorePool,
    cycle_delay: std::time::Duration,
    fetch_cap: usize,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let crawler = SourceCrawler::new(source, adapter, pool, cycle_delay, fetch_cap);
    tokio::spawn(async move {
        crawler.run(shutdown).await;
    })
}
