//! Pagination module: how many results pages a query has
//!
//! - `PageInspector`: CSS-selector checks on results page HTML
//! - `PaginationCache`: the persistent `page_count_cache.json`
//! - `PaginationTracker`: cache-first discovery with linear or exponential probing

mod cache;
mod inspector;
mod tracker;

pub use cache::PaginationCache;
pub use inspector::{collapse_whitespace, visible_text, PageInspector};
pub use tracker::{PaginationError, PaginationTracker, ProbeSettings};
