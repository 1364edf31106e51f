//! Core data model: listings, page results, and the resumable scrape run

mod listing;
mod query;
mod run;

pub use listing::{Condition, ExtractedListing, Gun, ListingPreview, PageIndex};
pub use query::{compute_query_key, MarketplaceQuery};
pub use run::{Confidence, PageCounts, PageResult, PaginationCacheEntry, ScrapeRun};
