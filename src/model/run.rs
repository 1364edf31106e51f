use crate::model::{ExtractedListing, PageIndex};
use crate::state::{ExtractionQuality, PageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// How much a discovered page count can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// A terminal page was observed
    High,
    /// Probing stopped at the configured cap
    Low,
}

impl Confidence {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A discovered page count for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCacheEntry {
    pub query_key: String,
    pub total_pages: u32,
    pub discovered_at: DateTime<Utc>,
    pub confidence: Confidence,
}

impl PaginationCacheEntry {
    pub fn new(query_key: &str, total_pages: u32, confidence: Confidence) -> Self {
        Self {
            query_key: query_key.to_string(),
            total_pages,
            discovered_at: Utc::now(),
            confidence,
        }
    }

    /// High-confidence entries are served without probing
    pub fn is_trusted(&self) -> bool {
        self.confidence == Confidence::High
    }
}

/// The outcome of processing one results page
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page_index: PageIndex,
    pub status: PageStatus,
    pub listings: Vec<ExtractedListing>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
    /// Retried fetch and extraction calls spent on this page
    pub retry_count: u32,
    pub quality: Option<ExtractionQuality>,
}

impl PageResult {
    pub fn pending(page_index: PageIndex) -> Self {
        Self {
            page_index,
            status: PageStatus::Pending,
            listings: Vec::new(),
            attempted_at: None,
            error_summary: None,
            retry_count: 0,
            quality: None,
        }
    }

    pub fn done(
        page_index: PageIndex,
        listings: Vec<ExtractedListing>,
        quality: ExtractionQuality,
        retry_count: u32,
    ) -> Self {
        Self {
            page_index,
            status: PageStatus::Done,
            listings,
            attempted_at: Some(Utc::now()),
            error_summary: None,
            retry_count,
            quality: Some(quality),
        }
    }

    pub fn failed(page_index: PageIndex, error_summary: impl Into<String>, retry_count: u32) -> Self {
        Self {
            page_index,
            status: PageStatus::Failed,
            listings: Vec::new(),
            attempted_at: Some(Utc::now()),
            error_summary: Some(error_summary.into()),
            retry_count,
            quality: None,
        }
    }
}

/// Page counts of a run, grouped by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub full: usize,
    pub partial: usize,
    pub failed: usize,
    pub pending: usize,
}

impl PageCounts {
    pub fn done(&self) -> usize {
        self.full + self.partial
    }

    pub fn total(&self) -> usize {
        self.full + self.partial + self.failed + self.pending
    }
}

/// The working copy of one resumable scrape
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRun {
    pub query_key: String,
    pub pagination: PaginationCacheEntry,
    pub pages: BTreeMap<PageIndex, PageResult>,
    /// Hash of the configuration the run was started with
    pub config_hash: String,
    pub created_at: DateTime<Utc>,
}

impl ScrapeRun {
    /// Creates a run with every page in `[1, total_pages]` pending
    pub fn new(pagination: PaginationCacheEntry, config_hash: &str) -> Self {
        let mut run = Self {
            query_key: pagination.query_key.clone(),
            pagination: pagination.clone(),
            pages: BTreeMap::new(),
            config_hash: config_hash.to_string(),
            created_at: Utc::now(),
        };
        run.fill_pending();
        run
    }

    pub fn total_pages(&self) -> u32 {
        self.pagination.total_pages
    }

    /// Adopts a newer page count, returning the page indices it added
    ///
    /// The page range never shrinks: recorded work beyond a smaller count is
    /// kept and the larger count stays in force.
    pub fn sync_pagination(&mut self, pagination: PaginationCacheEntry) -> Vec<PageIndex> {
        let previous = self.total_pages();
        if pagination.total_pages < previous {
            warn!(
                "Page count for {} dropped from {} to {}; keeping {}",
                self.query_key, previous, pagination.total_pages, previous
            );
            self.pagination.confidence = pagination.confidence;
            self.pagination.discovered_at = pagination.discovered_at;
            return Vec::new();
        }

        self.pagination = pagination;
        self.fill_pending();
        (previous + 1..=self.total_pages()).collect()
    }

    fn fill_pending(&mut self) {
        for page in 1..=self.total_pages() {
            self.pages
                .entry(page)
                .or_insert_with(|| PageResult::pending(page));
        }
    }

    /// Pages in `[1, total_pages]` that are not done, ascending
    pub fn pending_pages(&self) -> Vec<PageIndex> {
        self.pages_in_range()
            .filter(|p| p.status.needs_work())
            .map(|p| p.page_index)
            .collect()
    }

    /// Pages that failed, ascending
    pub fn failed_pages(&self) -> Vec<PageIndex> {
        self.pages_in_range()
            .filter(|p| p.status == PageStatus::Failed)
            .map(|p| p.page_index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.total_pages() > 0 && self.pages_in_range().all(|p| p.status.is_done())
    }

    pub fn page(&self, page_index: PageIndex) -> Option<&PageResult> {
        self.pages.get(&page_index)
    }

    /// Replaces a page's result in the working copy
    ///
    /// A done page is never downgraded; the incoming result is dropped and
    /// `false` returned.
    pub fn record(&mut self, result: PageResult) -> bool {
        if let Some(existing) = self.pages.get(&result.page_index) {
            if !existing.status.can_transition_to(result.status) {
                warn!(
                    "Ignoring {} result for page {} which is already {}",
                    result.status, result.page_index, existing.status
                );
                return false;
            }
        }
        self.pages.insert(result.page_index, result);
        true
    }

    pub fn counts(&self) -> PageCounts {
        let mut counts = PageCounts::default();
        for page in self.pages_in_range() {
            match (page.status, page.quality) {
                (PageStatus::Done, Some(ExtractionQuality::Partial)) => counts.partial += 1,
                (PageStatus::Done, _) => counts.full += 1,
                (PageStatus::Failed, _) => counts.failed += 1,
                (PageStatus::Pending, _) => counts.pending += 1,
            }
        }
        counts
    }

    /// Listings of done pages in page order, then discovery order
    pub fn listings_in_order(&self) -> impl Iterator<Item = &ExtractedListing> {
        self.pages_in_range()
            .filter(|p| p.status.is_done())
            .flat_map(|p| p.listings.iter())
    }

    fn pages_in_range(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.range(1..=self.total_pages()).map(|(_, page)| page)
    }
}
