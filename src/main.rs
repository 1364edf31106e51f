//! Gunscraper main entry point
//!
//! This is the command-line interface for the Gunscraper marketplace scraper.

use anyhow::Context;
use clap::Parser;
use gunscraper::config::{load_config_with_hash, Config};
use gunscraper::crawler::scrape;
use gunscraper::model::MarketplaceQuery;
use gunscraper::output::{print_report, print_statistics, RunStatistics};
use gunscraper::pagination::PaginationCache;
use gunscraper::storage::{open_storage, ProgressStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Gunscraper: a resumable marketplace listing scraper
///
/// Gunscraper walks every results page of a marketplace query, extracts
/// typed listings with an AI backend and checkpoints each page, so an
/// interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "gunscraper")]
#[command(version = "1.0.0")]
#[command(about = "A resumable marketplace listing scraper", long_about = None)]
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

    /// Discard stored progress and the cached page count before scraping
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be scraped without scraping
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show progress statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Write the dataset from stored progress and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    export: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config).await?;
        Ok(ExitCode::SUCCESS)
    } else if cli.stats {
        handle_stats(&config)?;
        Ok(ExitCode::SUCCESS)
    } else if cli.export {
        handle_export(&config).await?;
        Ok(ExitCode::SUCCESS)
    } else {
        handle_scrape(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gunscraper=info,warn"),
            1 => EnvFilter::new("gunscraper=debug,info"),
            2 => EnvFilter::new("gunscraper=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be scraped
async fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let query = MarketplaceQuery::from_config(&config.query)?;

    println!("=== Gunscraper Dry Run ===\n");

    println!("Query:");
    println!("  Key: {}", query.key());
    println!("  First page: {}", query.page_url(1)?);
    for (name, value) in &config.query.params {
        println!("  {} = {}", name, value);
    }

    println!("\nPagination:");
    println!("  Listing selector: {}", config.pagination.listing_selector);
    println!(
        "  Probe: {:?} (up to {} pages)",
        config.pagination.probe_strategy, config.pagination.max_probe_pages
    );
    let cache = PaginationCache::load(Path::new(&config.output.cache_path)).await;
    match cache.get(query.key()) {
        Some(entry) => println!(
            "  Cached page count: {} ({} confidence)",
            entry.total_pages,
            entry.confidence.to_db_string()
        ),
        None => println!("  Cached page count: none, will probe"),
    }

    println!("\nFetcher:");
    println!(
        "  {} req/s, {} attempts, {}s timeout",
        config.fetcher.requests_per_second, config.fetcher.max_attempts, config.fetcher.timeout_secs
    );
    if let Some(proxy_url) = &config.fetcher.proxy_url {
        match &config.fetcher.proxy_username {
            Some(user) => println!(
                "  Proxy: {} as {} (password in ${})",
                proxy_url, user, config.fetcher.proxy_password_env
            ),
            None => println!("  Proxy: {}", proxy_url),
        }
    }

    println!("\nExtraction:");
    println!("  Model: {} via {}", config.extraction.model, config.extraction.api_base_url);
    let key_state = if std::env::var(&config.extraction.api_key_env).is_ok() {
        "set"
    } else {
        "NOT SET"
    };
    println!("  API key: ${} ({})", config.extraction.api_key_env, key_state);

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Concurrency: {}", config.effective_concurrency());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Page count cache: {}", config.output.cache_path);
    println!("  Dataset: {}", config.output.dataset_path);

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows progress from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let query = MarketplaceQuery::from_config(&config.query)?;
    let store = open_storage(Path::new(&config.output.database_path))?;

    println!("Database: {}\n", config.output.database_path);

    let stats = store.load(query.key())?.map(|run| RunStatistics::from_run(&run));
    let runs = store.list_runs()?;
    print_statistics(stats.as_ref(), &runs);

    Ok(())
}

/// Handles the --export mode: writes the dataset from stored progress
async fn handle_export(config: &Config) -> anyhow::Result<()> {
    let query = MarketplaceQuery::from_config(&config.query)?;
    let store = open_storage(Path::new(&config.output.database_path))?;

    let run = store
        .load(query.key())?
        .with_context(|| format!("no stored progress for query {}", query.key()))?;

    if !run.is_complete() {
        tracing::warn!(
            "Run is incomplete ({} pages not done); exporting what is stored",
            run.pending_pages().len()
        );
    }

    let summary =
        gunscraper::output::materialize(&run, Path::new(&config.output.dataset_path)).await?;
    println!(
        "✓ Exported {} records to {} ({} duplicates dropped)",
        summary.records,
        summary.path.display(),
        summary.duplicates_dropped
    );

    Ok(())
}

/// Handles the main scrape operation
async fn handle_scrape(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<ExitCode> {
    if fresh {
        tracing::info!("Starting fresh scrape (ignoring previous state)");
    } else {
        tracing::info!("Starting scrape (will resume stored progress)");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight pages");
            ctrl_c.cancel();
        }
    });

    let report = scrape(config, config_hash, fresh, cancel).await?;
    print_report(&report);

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
