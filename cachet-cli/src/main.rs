//! Cachet CLI
//!
//! Inspect and maintain a file-backed Cachet cache, or run a simulated
//! coalescing and prefetch session against it.

mod context;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cachet_core::types::key::{flavors_key, offering_key, offerings_key};
use cachet_core::types::{CacheValue, KeyClass, LookupType};
use cachet_fetch::{PrefetchConfig, PrefetchQueue};

use crate::context::AppContext;
use crate::demo::SimulatedApi;

/// Cachet - TTL cache with single-flight fetches and prefetching
#[derive(Parser)]
#[command(name = "cachet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cache file; without it the cache lives in memory only
    #[arg(short, long, global = true, env = "CACHET_STORE")]
    store: Option<PathBuf>,

    /// JSON policy table replacing the built-in policies
    #[arg(short, long, global = true, env = "CACHET_POLICIES")]
    policies: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved policy table
    Policies,

    /// Read a cached value
    Get {
        /// Cache key, e.g. catalog:abc
        key: String,
    },

    /// Write a value
    Set {
        /// Cache key
        key: String,
        /// JSON value; anything that is not valid JSON is stored as a string
        value: String,
        /// Optional JSON metadata (memory only)
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Delete a key
    Delete {
        /// Cache key
        key: String,
    },

    /// Delete every key starting with a prefix
    ClearPrefix {
        /// Key prefix, e.g. offerings:
        prefix: String,
    },

    /// Extend the TTL of every key starting with a prefix
    RefreshPrefix {
        /// Key prefix
        prefix: String,
    },

    /// Delete every entry
    Purge,

    /// Simulate concurrent reads and background prefetching
    Demo {
        /// Concurrent callers for one key
        #[arg(long, default_value = "10")]
        callers: usize,
        /// Catalogs to prefetch
        #[arg(long, default_value = "3")]
        catalogs: usize,
        /// Simulated remote latency
        #[arg(long, default_value = "150")]
        latency_ms: u64,
        /// Fail every n-th remote call (0 = never)
        #[arg(long, default_value = "7")]
        fail_every: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "cachet=debug,info"
    } else {
        "cachet=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ctx = AppContext::open(cli.store.as_deref(), cli.policies.as_deref()).await?;

    let result = match cli.command {
        Commands::Stats { json } => cmd_stats(&ctx, json),
        Commands::Policies => cmd_policies(&ctx),
        Commands::Get { key } => cmd_get(&ctx, &key),
        Commands::Set { key, value, metadata } => cmd_set(&ctx, &key, &value, metadata.as_deref()),
        Commands::Delete { key } => cmd_delete(&ctx, &key),
        Commands::ClearPrefix { prefix } => cmd_clear_prefix(&ctx, &prefix),
        Commands::RefreshPrefix { prefix } => cmd_refresh_prefix(&ctx, &prefix),
        Commands::Purge => cmd_purge(&ctx),
        Commands::Demo {
            callers,
            catalogs,
            latency_ms,
            fail_every,
        } => cmd_demo(&ctx, callers, catalogs, latency_ms, fail_every).await,
    };

    ctx.shutdown().await?;
    result
}

/// Show cache statistics
fn cmd_stats(ctx: &AppContext, as_json: bool) -> Result<()> {
    let stats = ctx.store.get_stats();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "📊 Cache statistics".cyan().bold());
    if !ctx.is_persistent() {
        println!("   {}", "(memory only; use --store to open a cache file)".dimmed());
    }
    println!("   {} {}", "Total:".dimmed(), stats.total_size);
    println!("   {} {}", "Active:".green(), stats.active_entries);
    println!("   {} {}", "Expired:".yellow(), stats.expired_entries);
    println!("   {} {}", "Persistent:".dimmed(), stats.persistent_entries);

    if !stats.entries_by_prefix.is_empty() {
        println!("\n{}", "By class:".yellow().bold());
        for (prefix, count) in &stats.entries_by_prefix {
            println!("   {:<12} {}", prefix, count);
        }
    }

    Ok(())
}

/// Show the resolved policy table
fn cmd_policies(ctx: &AppContext) -> Result<()> {
    println!("{}", "📋 Cache policies".cyan().bold());
    let registry = ctx.store.registry();

    for class in KeyClass::ALL {
        let policy = registry.policy_for(class);
        let storage = if policy.persistent {
            format!("persistent ({})", policy.storage_prefix).green()
        } else {
            "memory".dimmed()
        };
        println!("   {:<10} ttl {:>6}s  {}", class.as_str(), policy.ttl_seconds, storage);
    }

    Ok(())
}

/// Read a cached value
fn cmd_get(ctx: &AppContext, key: &str) -> Result<()> {
    match ctx.store.get(key) {
        Some(value) => {
            println!("{} {}", "✅ Hit:".green().bold(), key);
            println!("{}", serde_json::to_string_pretty(&value)?);
            if let Some(metadata) = ctx.store.get_metadata(key) {
                println!("\n{}", "Metadata:".yellow());
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
        }
        None => println!("{} {}", "⚠️  Miss:".yellow(), key),
    }
    Ok(())
}

/// Write a value
fn cmd_set(ctx: &AppContext, key: &str, value: &str, metadata: Option<&str>) -> Result<()> {
    let value: CacheValue =
        serde_json::from_str(value).unwrap_or_else(|_| CacheValue::String(value.to_string()));
    let metadata = metadata
        .map(serde_json::from_str::<CacheValue>)
        .transpose()
        .context("Metadata must be valid JSON")?;

    ctx.store.set_with_metadata(key, value, metadata);

    let policy = ctx.store.registry().resolve(key);
    println!("{} {}", "✅ Stored:".green().bold(), key);
    println!(
        "   {} {}s{}",
        "TTL:".dimmed(),
        policy.ttl_seconds,
        if policy.persistent && ctx.is_persistent() { ", persisted" } else { "" }
    );
    Ok(())
}

/// Delete a key
fn cmd_delete(ctx: &AppContext, key: &str) -> Result<()> {
    let existed = ctx.store.contains(key);
    ctx.store.delete(key);
    if existed {
        println!("{} {}", "🗑️  Deleted:".green(), key);
    } else {
        println!("{} {}", "Not cached:".dimmed(), key);
    }
    Ok(())
}

/// Delete every key starting with a prefix
fn cmd_clear_prefix(ctx: &AppContext, prefix: &str) -> Result<()> {
    let removed = ctx.store.clear_prefix(prefix);
    println!("{} {} entr{} under '{}'", "🗑️  Removed".green(), removed, if removed == 1 { "y" } else { "ies" }, prefix);
    Ok(())
}

/// Extend the TTL of every key starting with a prefix
fn cmd_refresh_prefix(ctx: &AppContext, prefix: &str) -> Result<()> {
    ctx.store.refresh_prefix(prefix);
    let policy = ctx.store.registry().resolve(prefix);
    println!("{} '{}' to {}s", "🔄 Extended TTL under".green(), prefix, policy.ttl_seconds);
    if policy.persistent && ctx.is_persistent() {
        println!("   {}", "Persisted copies updated".dimmed());
    }
    Ok(())
}

/// Delete every entry
fn cmd_purge(ctx: &AppContext) -> Result<()> {
    let removed = ctx.store.clear_all();
    println!("{} {} entries", "🗑️  Purged".green(), removed);
    Ok(())
}

/// Simulate concurrent reads and background prefetching
async fn cmd_demo(
    ctx: &AppContext,
    callers: usize,
    catalogs: usize,
    latency_ms: u64,
    fail_every: usize,
) -> Result<()> {
    println!("{}", "🧪 Running coalescing + prefetch demo...".cyan().bold());

    let latency = Duration::from_millis(latency_ms);
    let api = Arc::new(SimulatedApi::new(latency, 4, fail_every));

    // Concurrent reads of one key
    println!("\n{}", "1. Concurrent direct reads...".dimmed());
    let key = offering_key("demo", "o1");
    ctx.store.delete(&key);

    let start = Instant::now();
    let reads = (0..callers).map(|_| {
        let api = api.clone();
        ctx.coalescer
            .get_or_fetch(&key, move |key| async move { api.offering(&key).await }, false)
    });
    let results = join_all(reads).await;
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    println!(
        "   ✓ {} callers, {} succeeded, {} remote call(s) in {:?}",
        callers,
        succeeded,
        api.calls(),
        start.elapsed()
    );

    // Background warming
    println!("\n{}", "2. Prefetching catalogs...".dimmed());
    let queue = PrefetchQueue::builder(ctx.coalescer.clone())
        .config(PrefetchConfig::default().retry_delay(latency))
        .shared_fetcher(LookupType::Catalog, api.clone())
        .shared_fetcher(LookupType::Offerings, api.clone())
        .shared_fetcher(LookupType::Flavors, api.clone())
        .build();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("   {spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("warming cache");

    let before = api.calls();
    let start = Instant::now();
    for i in 0..catalogs {
        queue.prefetch_catalog_data(&format!("cat{}", i)).await;
    }
    queue.wait_idle().await;
    spinner.finish_and_clear();

    let stats = queue.stats();
    println!("   ✓ Warmed in {:?} with {} remote call(s)", start.elapsed(), api.calls() - before);
    println!(
        "   {} enqueued {}, succeeded {}, exhausted {}, attempts {}",
        "Queue:".dimmed(),
        stats.enqueued,
        stats.succeeded,
        stats.exhausted,
        stats.attempts
    );

    // Warm reads
    println!("\n{}", "3. Reading warmed keys...".dimmed());
    let before = api.calls();
    let warmed = [offerings_key("cat0"), flavors_key("cat0", "cat0-o0")];
    for key in &warmed {
        let api = api.clone();
        let hit = ctx.store.contains(key);
        let _ = ctx
            .coalescer
            .get_or_fetch(key, move |key| async move { api.offering(&key).await }, false)
            .await;
        let marker = if hit { "hit".green() } else { "miss".yellow() };
        println!("   {} {}", marker, key);
    }
    println!("   ✓ {} extra remote call(s)", api.calls() - before);

    let cache = ctx.store.get_stats();
    println!("\n{}", "📈 Results:".green().bold());
    println!("   Cached entries: {}", cache.active_entries);
    for (prefix, count) in &cache.entries_by_prefix {
        println!("   {:<12} {}", prefix, count);
    }

    Ok(())
}
