//! Gunscraper: a resumable marketplace listing scraper
//!
//! This crate crawls a paginated firearm marketplace, turns every results page
//! into typed listing records through an AI extraction backend, and checkpoints
//! each page so an interrupted run picks up exactly where it stopped.

pub mod config;
pub mod crawler;
pub mod extraction;
pub mod model;
pub mod output;
pub mod pagination;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Gunscraper operations
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Pagination error: {0}")]
    Pagination(#[from] pagination::PaginationError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] extraction::ExtractionError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::OrchestratorState,
        to: state::OrchestratorState,
    },

    #[error("Page worker failed: {0}")]
    Worker(String),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
}

/// Result type alias for Gunscraper operations
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::Coordinator;
pub use model::{ExtractedListing, Gun, ListingPreview, PageIndex, PageResult, ScrapeRun};
pub use state::{OrchestratorState, PageStatus};
