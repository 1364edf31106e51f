//! Page-count discovery
//!
//! Answers "how many results pages does this query have", serving trusted
//! answers from the cache and probing the marketplace otherwise.

use crate::config::{PaginationConfig, ProbeStrategy};
use crate::crawler::{FetchError, PageFetcher};
use crate::model::{Confidence, PageIndex, PaginationCacheEntry};
use crate::pagination::cache::PaginationCache;
use crate::pagination::inspector::PageInspector;
use crate::storage::StorageError;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fatal failure determining the page count
#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("query {query_key} has no results: page 1 is empty")]
    NoResults { query_key: String },

    #[error("probing page {page_index} failed: {source}")]
    Probe {
        page_index: PageIndex,
        #[source]
        source: FetchError,
    },

    #[error("page count cache error: {0}")]
    Cache(#[from] StorageError),
}

/// Probe settings taken from `[pagination]`
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub strategy: ProbeStrategy,
    pub max_probe_pages: u32,
}

impl ProbeSettings {
    pub fn from_config(config: &PaginationConfig) -> Self {
        Self {
            strategy: config.probe_strategy,
            max_probe_pages: config.max_probe_pages,
        }
    }
}

/// Outcome of a probe: the last page with listings, and whether a terminal
/// page was actually observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbeOutcome {
    last_page: u32,
    terminal_seen: bool,
}

/// Discovers and caches the total page count of a query
pub struct PaginationTracker {
    cache: PaginationCache,
    fetcher: Arc<PageFetcher>,
    inspector: Arc<PageInspector>,
    settings: ProbeSettings,
    probes: u32,
}

impl PaginationTracker {
    /// Opens the tracker over the cache file at `cache_path`
    pub async fn open(
        cache_path: &Path,
        fetcher: Arc<PageFetcher>,
        inspector: Arc<PageInspector>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            cache: PaginationCache::load(cache_path).await,
            fetcher,
            inspector,
            settings,
            probes: 0,
        }
    }

    /// Number of pages fetched for probing since the tracker was opened
    pub fn probe_count(&self) -> u32 {
        self.probes
    }

    pub fn cached(&self, query_key: &str) -> Option<PaginationCacheEntry> {
        self.cache.get(query_key)
    }

    /// Returns the total page count for a query
    ///
    /// A high-confidence cache entry is returned without any network call.
    /// Otherwise the configured strategy probes the marketplace and the result
    /// is written back: `high` if a terminal page was seen, `low` if probing
    /// stopped at the cap.
    ///
    /// # Returns
    ///
    /// * `Ok(PaginationCacheEntry)` - The discovered count
    /// * `Err(PaginationError::NoResults)` - Page 1 is already terminal
    /// * `Err(PaginationError::Probe)` - A probe failed for a reason other than 404/410
    pub async fn discover(
        &mut self,
        query_key: &str,
    ) -> Result<PaginationCacheEntry, PaginationError> {
        if let Some(entry) = self.cache.get(query_key) {
            if entry.is_trusted() {
                debug!(
                    query = query_key,
                    total_pages = entry.total_pages,
                    "Using cached page count"
                );
                return Ok(entry);
            }
            info!(
                query = query_key,
                total_pages = entry.total_pages,
                "Cached page count has low confidence, probing again"
            );
        }

        let limit = self.settings.max_probe_pages;
        let outcome = match self.settings.strategy {
            ProbeStrategy::Linear => self.probe_linear(1, limit).await?,
            ProbeStrategy::Exponential => self.probe_exponential(limit).await?,
        };

        if outcome.last_page == 0 {
            return Err(PaginationError::NoResults {
                query_key: query_key.to_string(),
            });
        }

        self.store(query_key, outcome).await
    }

    /// Drops the cached count for a query
    pub async fn invalidate(&mut self, query_key: &str) -> Result<bool, PaginationError> {
        Ok(self.cache.invalidate(query_key).await?)
    }

    /// Probes linearly from `start` and caches the result
    ///
    /// Used after drift: pages before `start` are known to exist, so the
    /// returned count is never below `start - 1`.
    pub async fn reprobe_from(
        &mut self,
        query_key: &str,
        start: PageIndex,
    ) -> Result<PaginationCacheEntry, PaginationError> {
        let start = start.max(1);
        let limit = self.settings.max_probe_pages.max(start);
        let outcome = self.probe_linear(start, limit).await?;

        if outcome.last_page == 0 {
            return Err(PaginationError::NoResults {
                query_key: query_key.to_string(),
            });
        }

        self.store(query_key, outcome).await
    }

    async fn store(
        &mut self,
        query_key: &str,
        outcome: ProbeOutcome,
    ) -> Result<PaginationCacheEntry, PaginationError> {
        let confidence = if outcome.terminal_seen {
            Confidence::High
        } else {
            warn!(
                query = query_key,
                cap = outcome.last_page,
                "Probe cap reached without a terminal page; caching with low confidence"
            );
            Confidence::Low
        };

        let entry = PaginationCacheEntry::new(query_key, outcome.last_page, confidence);
        self.cache.put(&entry).await?;
        info!(
            query = query_key,
            total_pages = entry.total_pages,
            probes = self.probes,
            "Discovered page count"
        );
        Ok(entry)
    }

    /// Fetches `start, start+1, ...` until a terminal page or `limit`
    async fn probe_linear(
        &mut self,
        start: PageIndex,
        limit: u32,
    ) -> Result<ProbeOutcome, PaginationError> {
        let mut last_page = start - 1;
        for page in start..=limit {
            if !self.page_has_listings(page).await? {
                return Ok(ProbeOutcome {
                    last_page,
                    terminal_seen: true,
                });
            }
            last_page = page;
        }
        Ok(ProbeOutcome {
            last_page,
            terminal_seen: false,
        })
    }

    /// Gallops 1, 2, 4, ... to a terminal page, then binary searches the boundary
    async fn probe_exponential(&mut self, limit: u32) -> Result<ProbeOutcome, PaginationError> {
        if !self.page_has_listings(1).await? {
            return Ok(ProbeOutcome {
                last_page: 0,
                terminal_seen: true,
            });
        }

        // Invariant: `low` has listings, `high` (once set) does not
        let mut low = 1;
        let mut high = None;
        let mut probe = 2u32;
        while probe <= limit {
            if self.page_has_listings(probe).await? {
                low = probe;
                probe = probe.saturating_mul(2);
            } else {
                high = Some(probe);
                break;
            }
        }

        let mut high = match high {
            Some(high) => high,
            None if low == limit => {
                return Ok(ProbeOutcome {
                    last_page: limit,
                    terminal_seen: false,
                })
            }
            None => {
                if self.page_has_listings(limit).await? {
                    return Ok(ProbeOutcome {
                        last_page: limit,
                        terminal_seen: false,
                    });
                }
                limit
            }
        };

        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.page_has_listings(mid).await? {
                low = mid;
            } else {
                high = mid;
            }
        }

        Ok(ProbeOutcome {
            last_page: low,
            terminal_seen: true,
        })
    }

    /// Returns false for a terminal page: 404/410 or no listing elements
    async fn page_has_listings(&mut self, page_index: PageIndex) -> Result<bool, PaginationError> {
        self.probes += 1;
        match self.fetcher.fetch(page_index).await {
            Ok(page) => {
                let count = self.inspector.listing_count(&page.body);
                debug!(page = page_index, listings = count, "Probed page");
                Ok(count > 0)
            }
            Err(e) if e.is_missing_page() => {
                debug!(page = page_index, "Probed page does not exist");
                Ok(false)
            }
            Err(source) => Err(PaginationError::Probe { page_index, source }),
        }
    }
}
