//! Crawler module for marketplace fetching and run coordination
//!
//! This module contains the core scraping logic, including:
//! - HTTP fetching with failure classification and retry logic
//! - Token-bucket rate limiting of outbound calls
//! - The coordinator that drives a run through its states

mod coordinator;
mod fetcher;
mod limiter;
mod retry;

pub use coordinator::Coordinator;
pub use fetcher::{
    build_http_client, classify_status, marketplace_proxy, parse_retry_after, FailureClass,
    FetchError, FetchedPage, PageFetcher,
};
pub use limiter::CallLimiter;
pub use retry::RetryPolicy;

use crate::config::Config;
use crate::output::RunReport;
use crate::ScrapeError;
use tokio_util::sync::CancellationToken;

/// Runs a complete scrape for the configured query
///
/// This is the main entry point for starting a scrape. It will:
/// 1. Open the progress database and the AI backend
/// 2. Load, resume or discard the stored run
/// 3. Discover the page count
/// 4. Fetch and extract every page not yet done
/// 5. Write the dataset once every page has been attempted
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the configuration file
/// * `fresh` - Discard stored progress and the cached page count first
/// * `cancel` - Token that interrupts the run when cancelled
///
/// # Returns
///
/// * `Ok(RunReport)` - The run finished, was interrupted or aborted
/// * `Err(ScrapeError)` - The coordinator could not be set up
pub async fn scrape(
    config: Config,
    config_hash: &str,
    fresh: bool,
    cancel: CancellationToken,
) -> Result<RunReport, ScrapeError> {
    let mut coordinator = Coordinator::from_config(config, config_hash, cancel)?.with_fresh(fresh);
    Ok(coordinator.run().await)
}
