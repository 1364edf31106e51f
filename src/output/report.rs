//! Run reports and progress statistics
//!
//! This module provides the end-of-run report returned by the coordinator
//! and the `--stats` view over the progress database.

use crate::model::{PageCounts, PageIndex, ScrapeRun};
use crate::storage::RunSummary;
use std::fmt;

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every page was attempted in this invocation
    Completed,
    /// Cancelled; remaining pages stay pending
    Interrupted,
    /// A fatal error stopped the run
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-of-run report
#[derive(Debug, Clone)]
pub struct RunReport {
    pub query_key: String,
    pub status: RunStatus,
    pub total_pages: u32,
    pub counts: PageCounts,
    /// Pages not yet done, ascending
    pub remaining_pages: Vec<PageIndex>,
    pub failed_pages: Vec<PageIndex>,
    /// Dataset records written; `None` unless the run completed
    pub records_written: Option<usize>,
    pub duplicates_dropped: usize,
    /// Fatal cause of an aborted run
    pub abort_cause: Option<String>,
}

impl RunReport {
    /// Builds a report from the working copy at the end of an invocation
    pub fn from_run(run: &ScrapeRun, status: RunStatus) -> Self {
        Self {
            query_key: run.query_key.clone(),
            status,
            total_pages: run.total_pages(),
            counts: run.counts(),
            remaining_pages: run.pending_pages(),
            failed_pages: run.failed_pages(),
            records_written: None,
            duplicates_dropped: 0,
            abort_cause: None,
        }
    }

    /// Report for an invocation that stopped before any run existed
    pub fn without_run(query_key: &str, status: RunStatus) -> Self {
        Self {
            query_key: query_key.to_string(),
            status,
            total_pages: 0,
            counts: PageCounts::default(),
            remaining_pages: Vec::new(),
            failed_pages: Vec::new(),
            records_written: None,
            duplicates_dropped: 0,
            abort_cause: None,
        }
    }

    pub fn with_abort_cause(mut self, cause: impl Into<String>) -> Self {
        self.abort_cause = Some(cause.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Aborted
    }
}

/// Prints a run report to stdout
pub fn print_report(report: &RunReport) {
    println!("=== Scrape Run {} ===\n", report.status);
    println!("Query: {}", report.query_key);
    println!("Pages: {}", report.total_pages);
    println!("  Full: {}", report.counts.full);
    println!("  Partial: {}", report.counts.partial);
    println!("  Failed: {}", report.counts.failed);
    println!("  Pending: {}", report.counts.pending);

    if !report.failed_pages.is_empty() {
        println!("\nFailed pages: {}", format_pages(&report.failed_pages));
    }

    if let Some(records) = report.records_written {
        println!(
            "\nDataset: {} records ({} duplicates dropped)",
            records, report.duplicates_dropped
        );
    }

    if let Some(cause) = &report.abort_cause {
        println!("\nAborted: {}", cause);
    }

    if report.status != RunStatus::Completed && !report.remaining_pages.is_empty() {
        println!("Remaining pages: {}", format_pages(&report.remaining_pages));
    }
}

/// Progress of one stored run, for `--stats`
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub query_key: String,
    pub total_pages: u32,
    pub confidence: String,
    pub counts: PageCounts,
    pub listings: usize,
    pub listings_with_details: usize,
    pub retries: u32,
    pub failed_pages: Vec<PageIndex>,
}

impl RunStatistics {
    pub fn from_run(run: &ScrapeRun) -> Self {
        let listings: Vec<_> = run.listings_in_order().collect();
        Self {
            query_key: run.query_key.clone(),
            total_pages: run.total_pages(),
            confidence: run.pagination.confidence.to_db_string().to_string(),
            counts: run.counts(),
            listings: listings.len(),
            listings_with_details: listings.iter().filter(|l| l.has_details()).count(),
            retries: run.pages.values().map(|p| p.retry_count).sum(),
            failed_pages: run.failed_pages(),
        }
    }

    /// Share of pages done, as a percentage
    pub fn completion(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            self.counts.done() as f64 / self.total_pages as f64 * 100.0
        }
    }
}

/// Prints statistics for one run plus a one-line listing of every stored run
pub fn print_statistics(stats: Option<&RunStatistics>, runs: &[RunSummary]) {
    println!("=== Scrape Statistics ===\n");

    match stats {
        Some(stats) => {
            println!("Query: {}", stats.query_key);
            println!(
                "  Pages: {} ({} confidence)",
                stats.total_pages, stats.confidence
            );
            println!(
                "  Done: {} ({:.1}%), {} full / {} partial",
                stats.counts.done(),
                stats.completion(),
                stats.counts.full,
                stats.counts.partial
            );
            println!("  Failed: {}", stats.counts.failed);
            println!("  Pending: {}", stats.counts.pending);
            println!(
                "  Listings: {} ({} with gun details)",
                stats.listings, stats.listings_with_details
            );
            println!("  Retries spent: {}", stats.retries);
            if !stats.failed_pages.is_empty() {
                println!("  Failed pages: {}", format_pages(&stats.failed_pages));
            }
        }
        None => println!("No progress recorded for the configured query"),
    }

    if !runs.is_empty() {
        println!("\nStored runs ({}):", runs.len());
        for run in runs {
            println!(
                "  - {} {}/{} done, {} failed, updated {}{}",
                &run.query_key[..run.query_key.len().min(12)],
                run.done_pages,
                run.total_pages,
                run.failed_pages,
                run.updated_at,
                if run.is_complete() { " (complete)" } else { "" }
            );
        }
    }
}

/// Formats page indices, collapsing consecutive runs: `1-3, 7, 9-10`
pub fn format_pages(pages: &[PageIndex]) -> String {
    let mut parts = Vec::new();
    let mut iter = pages.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(", ")
}
