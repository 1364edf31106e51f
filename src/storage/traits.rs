//! Storage traits and error types
//!
//! This module defines the trait interface for progress stores and
//! associated error types.

use crate::model::{PageResult, ScrapeRun};
use crate::storage::RunSummary;
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Every storage error is fatal to a run: the store is the source of truth for
/// completed pages and a failed write means that truth is unknown.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable home of scrape runs
///
/// Each write is atomic: after a crash the store holds either the previous or
/// the new state of whatever was being written, never a mix.
pub trait ProgressStore {
    // ===== Run Management =====

    /// Loads the run for a query, if one exists
    fn load(&self, query_key: &str) -> StorageResult<Option<ScrapeRun>>;

    /// Writes the whole run; calling it twice with the same run is a no-op
    fn save(&mut self, run: &ScrapeRun) -> StorageResult<()>;

    /// Removes a run and everything recorded under it
    ///
    /// # Returns
    ///
    /// `true` if a run was deleted
    fn delete_run(&mut self, query_key: &str) -> StorageResult<bool>;

    /// Summaries of every stored run
    fn list_runs(&self) -> StorageResult<Vec<RunSummary>>;

    // ===== Page Management =====

    /// Records the outcome of one page, replacing any earlier outcome
    ///
    /// # Arguments
    ///
    /// * `query_key` - The run the page belongs to; it must already be saved
    /// * `result` - The page's status, listings and bookkeeping
    fn mark_page(&mut self, query_key: &str, result: &PageResult) -> StorageResult<()>;
}
