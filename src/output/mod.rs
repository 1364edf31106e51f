//! Output module for run results
//!
//! This module handles:
//! - Materializing the deduplicated listing dataset
//! - End-of-run reports
//! - Progress statistics for `--stats`

mod dataset;
mod report;

pub use dataset::{consolidate, materialize, DatasetSummary};
pub use report::{
    format_pages, print_report, print_statistics, RunReport, RunStatistics, RunStatus,
};
