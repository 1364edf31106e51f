//! Final dataset materialization
//!
//! The dataset is a JSON array of listing records, ordered by page index and
//! then discovery order, with one record per `listing_id`.

use crate::model::{ExtractedListing, ScrapeRun};
use crate::storage::{write_json_atomic, StorageResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// What `materialize` wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub records: usize,
    pub duplicates_dropped: usize,
}

/// Collects the run's listings, keeping the first occurrence of each `listing_id`
///
/// # Returns
///
/// The deduplicated records and the number of duplicates dropped
pub fn consolidate(run: &ScrapeRun) -> (Vec<ExtractedListing>, usize) {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut duplicates = 0;

    for listing in run.listings_in_order() {
        if seen.insert(listing.listing_id()) {
            records.push(listing.clone());
        } else {
            duplicates += 1;
        }
    }

    (records, duplicates)
}

/// Writes the consolidated dataset atomically to `path`
///
/// # Arguments
///
/// * `run` - The run whose done pages are written
/// * `path` - Destination, usually `scraping_results.json`
///
/// # Returns
///
/// * `Ok(DatasetSummary)` - Records written and duplicates dropped
/// * `Err(StorageError)` - The file could not be written
pub async fn materialize(run: &ScrapeRun, path: &Path) -> StorageResult<DatasetSummary> {
    let (records, duplicates_dropped) = consolidate(run);
    write_json_atomic(path, &records).await?;

    info!(
        records = records.len(),
        duplicates = duplicates_dropped,
        "Wrote dataset to {}",
        path.display()
    );

    Ok(DatasetSummary {
        path: path.to_path_buf(),
        records: records.len(),
        duplicates_dropped,
    })
}
