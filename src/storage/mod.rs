//! Storage module for persisting scrape progress
//!
//! This module handles all durable state:
//! - SQLite progress database (runs, pages, listings)
//! - Atomic JSON files for the page-count cache and the final dataset

mod json;
mod schema;
mod sqlite;
mod traits;

pub use json::{read_json, write_json_atomic};
pub use sqlite::SqliteProgressStore;
pub use traits::{ProgressStore, StorageError, StorageResult};

use std::path::Path;

/// Opens or creates the progress database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteProgressStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteProgressStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteProgressStore::new(path)
}

/// One stored run, as listed by [`ProgressStore::list_runs`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub query_key: String,
    pub total_pages: u32,
    pub confidence: String,
    pub config_hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub done_pages: u32,
    pub failed_pages: u32,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.total_pages > 0 && self.done_pages == self.total_pages
    }
}
