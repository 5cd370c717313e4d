//! Satellite cache maintenance CLI.
//!
//! Cached composites are immutable, so the cache is only ever cleaned by
//! space pressure or corruption, never by age. Every subcommand is safe
//! to run repeatedly; when nothing needs cleaning they are no-ops.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quota::{QuotaConfig, QuotaMonitor};
use tile_store::{TileStore, TileStoreConfig};

#[derive(Parser, Debug)]
#[command(name = "satctl")]
#[command(about = "Satellite tile cache and quota maintenance")]
struct Args {
    /// Cache directory
    #[arg(long, env = "SAT_CACHE_DIR", default_value = "./.sat_cache")]
    cache_dir: PathBuf,

    /// API usage tracking file
    #[arg(long, env = "API_USAGE_TRACKING_FILE", default_value = "./.api_usage_tracking.json")]
    tracking_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show cache statistics
    Stats,
    /// Clean the cache: corrupted entries first, then by size budget
    Clean {
        /// Size budget in MB
        #[arg(long, default_value = "1000")]
        size_mb: u64,

        /// Only remove corrupted entries, skip the size sweep
        #[arg(long)]
        corrupted_only: bool,
    },
    /// Show API usage statistics
    Usage,
    /// Prune API usage records older than the retention window
    QuotaCleanup {
        /// Days of usage history to keep
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Stats => {
            let store = open_store(&args.cache_dir).await?;
            print_stats(&store).await;
        }
        Command::Clean {
            size_mb,
            corrupted_only,
        } => {
            let store = open_store(&args.cache_dir).await?;
            let before = store.stats().await;

            let corrupted = store.evict_corrupted().await;
            let evicted = if corrupted_only {
                0
            } else {
                store.evict_by_size(size_mb).await
            };

            let after = store.stats().await;
            println!("Cleanup complete:");
            println!("  corrupted removed: {}", corrupted);
            println!("  evicted by size:   {}", evicted);
            println!(
                "  freed:             {:.1} MB",
                (before.total_size_mb - after.total_size_mb).max(0.0)
            );
            println!("  remaining size:    {:.1} MB", after.total_size_mb);
            println!("  remaining entries: {}", after.entry_count);
        }
        Command::Usage => {
            let monitor = open_monitor(&args.tracking_file).await;
            let stats = monitor.usage_stats().await;
            println!("API usage:");
            println!("  today:           {}", stats.requests_today);
            println!("  yesterday:       {}", stats.yesterday_requests);
            println!("  this month:      {}", stats.requests_this_month);
            println!("  weekly average:  {:.1}/day", stats.weekly_average);
            println!(
                "  monthly limit:   {} ({:.1}% used)",
                stats.monthly_limit, stats.monthly_percentage
            );
            println!("  lifetime total:  {}", stats.total_requests);
            println!("  status:          {}", stats.status.as_str());
            println!("  recommendation:  {}", stats.recommendation);
        }
        Command::QuotaCleanup { days } => {
            let monitor = open_monitor(&args.tracking_file).await;
            let removed = monitor.cleanup_old_data(days).await;
            println!("Removed {} days of old usage records", removed);
        }
    }

    Ok(())
}

async fn open_store(cache_dir: &PathBuf) -> Result<TileStore> {
    Ok(TileStore::open(TileStoreConfig {
        cache_dir: cache_dir.clone(),
        ..TileStoreConfig::default()
    })
    .await?)
}

async fn open_monitor(tracking_file: &PathBuf) -> QuotaMonitor {
    let mut config = QuotaConfig::from_env();
    config.tracking_file = tracking_file.clone();
    QuotaMonitor::open(config).await
}

async fn print_stats(store: &TileStore) {
    let stats = store.stats().await;
    println!("Satellite tile cache:");
    println!("  entries:        {}", stats.entry_count);
    println!("  in memory:      {}", stats.memory_entry_count);
    println!("  total size:     {:.1} MB", stats.total_size_mb);
    println!("  cache hits:     {}", stats.cache_hits);
    println!("  cache misses:   {}", stats.cache_misses);
    println!("  hit rate:       {:.1}%", stats.hit_rate_percent);
    match stats.last_cleanup {
        Some(at) => println!("  last cleanup:   {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  last cleanup:   never"),
    }

    if stats.total_size_mb > 1000.0 {
        println!("  note: cache exceeds 1 GB, consider `satctl clean`");
    }
}
