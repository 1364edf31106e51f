//! Scrape coordinator - main run orchestration logic
//!
//! This module contains the run loop that coordinates every stage of a
//! scrape, including:
//! - Loading or discarding stored progress
//! - Discovering the page count
//! - Dispatching pages to a bounded pool of fetch and extract tasks
//! - Recording each finished page before anything else happens
//! - Handling cancellation, fatal errors and pagination drift
//! - Materializing the dataset

use crate::config::Config;
use crate::crawler::fetcher::{build_http_client, FetchError, FetchedPage, PageFetcher};
use crate::crawler::limiter::CallLimiter;
use crate::crawler::retry::RetryPolicy;
use crate::extraction::{
    ExtractionBackend, ExtractionEngine, ExtractionError, ExtractionOutcome, OpenAiBackend,
};
use crate::model::{MarketplaceQuery, PageIndex, PageResult, PaginationCacheEntry, ScrapeRun};
use crate::output::{materialize, RunReport, RunStatus};
use crate::pagination::{PageInspector, PaginationError, PaginationTracker, ProbeSettings};
use crate::state::OrchestratorState;
use crate::storage::{open_storage, ProgressStore};
use crate::ScrapeError;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one worker task
enum TaskOutput {
    Fetched {
        page_index: PageIndex,
        result: Result<FetchedPage, FetchError>,
    },
    Extracted {
        page_index: PageIndex,
        fetch_retries: u32,
        result: Result<ExtractionOutcome, ExtractionError>,
    },
}

/// How the page loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// Every queued page was attempted
    Finished,
    /// Cancellation left queued or in-flight pages unattempted
    Stopped,
}

/// Main scrape coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    query: Arc<MarketplaceQuery>,
    inspector: Arc<PageInspector>,
    fetcher: Arc<PageFetcher>,
    engine: Arc<ExtractionEngine>,
    store: Box<dyn ProgressStore + Send>,
    /// Cancelled by the caller (Ctrl-C)
    cancel: CancellationToken,
    /// Child of `cancel`; also cancelled on a fatal error
    work_cancel: CancellationToken,
    concurrency: usize,
    fresh: bool,
    state: OrchestratorState,
}

impl Coordinator {
    /// Creates a coordinator over an explicit backend and progress store
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded on the run
    /// * `backend` - The AI extraction backend
    /// * `store` - Progress store; the coordinator is its only writer
    /// * `cancel` - Token that stops the run when cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(ScrapeError)` - Invalid query or selectors, or HTTP client failure
    pub fn new(
        config: Config,
        config_hash: &str,
        backend: Arc<dyn ExtractionBackend>,
        store: Box<dyn ProgressStore + Send>,
        cancel: CancellationToken,
    ) -> Result<Self, ScrapeError> {
        let query = Arc::new(MarketplaceQuery::from_config(&config.query)?);
        let inspector = Arc::new(PageInspector::from_config(&config.pagination)?);
        let work_cancel = cancel.child_token();

        let timeout = Duration::from_secs(config.fetcher.timeout_secs);
        let client = build_http_client(&config.user_agent, &config.fetcher)?;
        let limiter = Arc::new(CallLimiter::new(
            "marketplace",
            config.fetcher.requests_per_second,
            config.fetcher.burst,
        ));
        let fetcher = Arc::new(PageFetcher::new(
            client,
            Arc::clone(&query),
            RetryPolicy::from_fetcher_config(&config.fetcher),
            limiter,
            timeout,
            work_cancel.clone(),
        ));

        let engine = Arc::new(ExtractionEngine::from_config(
            &config.extraction,
            backend,
            Arc::clone(&inspector),
            work_cancel.clone(),
        ));

        Ok(Self {
            concurrency: config.effective_concurrency(),
            config: Arc::new(config),
            config_hash: config_hash.to_string(),
            query,
            inspector,
            fetcher,
            engine,
            store,
            cancel,
            work_cancel,
            fresh: false,
            state: OrchestratorState::Init,
        })
    }

    /// Creates a coordinator with the OpenAI-compatible backend and the
    /// SQLite store named in `[output]`
    pub fn from_config(
        config: Config,
        config_hash: &str,
        cancel: CancellationToken,
    ) -> Result<Self, ScrapeError> {
        let backend = OpenAiBackend::from_config(
            &config.extraction,
            &config.user_agent.header_value(),
        )?;
        let store = open_storage(Path::new(&config.output.database_path))?;
        Self::new(config, config_hash, Arc::new(backend), Box::new(store), cancel)
    }

    /// Discard stored progress and the cached page count before running
    pub fn with_fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn query_key(&self) -> &str {
        self.query.key()
    }

    /// Runs the scrape to completion, interruption or abort
    ///
    /// Progress is flushed page by page, so an interrupted or aborted run
    /// resumes from where it stopped on the next invocation. The dataset is
    /// only written when the run completes.
    pub async fn run(&mut self) -> RunReport {
        let query_key = self.query.key().to_string();
        info!(
            query = %query_key,
            concurrency = self.concurrency,
            backend = self.engine.backend_name(),
            "Starting scrape"
        );

        let mut tracker = PaginationTracker::open(
            Path::new(&self.config.output.cache_path),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.inspector),
            ProbeSettings::from_config(&self.config.pagination),
        )
        .await;

        let stored = match self.load_stored(&mut tracker).await {
            Ok(stored) => stored,
            Err(e) => return self.stop_before_dispatch(&query_key, None, e),
        };

        let entry = match self.discover(&mut tracker).await {
            Ok(entry) => entry,
            Err(e) => return self.stop_before_dispatch(&query_key, stored.as_ref(), e),
        };

        let mut run = self.adopt(stored, entry);
        if let Err(e) = self.begin_dispatch(&run) {
            return self.stop_before_dispatch(&query_key, Some(&run), e);
        }

        let exit = match self.process_pages(&mut run, &mut tracker).await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Run aborted: {}", e);
                self.force_state(OrchestratorState::Aborted);
                return RunReport::from_run(&run, RunStatus::Aborted).with_abort_cause(e.to_string());
            }
        };

        if exit == LoopExit::Stopped {
            self.force_state(OrchestratorState::Interrupted);
            let report = RunReport::from_run(&run, RunStatus::Interrupted);
            info!(
                remaining = report.remaining_pages.len(),
                "Run interrupted; progress saved"
            );
            return report;
        }

        self.force_state(OrchestratorState::Complete);
        let mut report = RunReport::from_run(&run, RunStatus::Completed);
        match materialize(&run, Path::new(&self.config.output.dataset_path)).await {
            Ok(summary) => {
                report.records_written = Some(summary.records);
                report.duplicates_dropped = summary.duplicates_dropped;
            }
            Err(e) => {
                error!("Failed to write dataset: {}", e);
                self.state = OrchestratorState::Aborted;
                report.status = RunStatus::Aborted;
                report.abort_cause = Some(format!("dataset write failed: {}", e));
                return report;
            }
        }

        info!(
            full = report.counts.full,
            partial = report.counts.partial,
            failed = report.counts.failed,
            "Scrape complete"
        );
        report
    }

    /// INIT: the stored run to resume, if any
    ///
    /// With `--fresh` the stored run and the cached page count are discarded.
    async fn load_stored(
        &mut self,
        tracker: &mut PaginationTracker,
    ) -> Result<Option<ScrapeRun>, ScrapeError> {
        let query_key = self.query.key();

        if !self.fresh {
            return Ok(self.store.load(query_key)?);
        }
        if self.store.delete_run(query_key)? {
            info!("Discarded stored progress for {}", query_key);
        }
        tracker.invalidate(query_key).await?;
        Ok(None)
    }

    /// DISCOVER_PAGES
    async fn discover(
        &mut self,
        tracker: &mut PaginationTracker,
    ) -> Result<PaginationCacheEntry, ScrapeError> {
        self.transition(OrchestratorState::DiscoverPages)?;
        Ok(tracker.discover(self.query.key()).await?)
    }

    /// Builds the working copy from the stored run and the discovered count
    fn adopt(&self, stored: Option<ScrapeRun>, entry: PaginationCacheEntry) -> ScrapeRun {
        match stored {
            Some(mut run) => {
                if run.config_hash != self.config_hash {
                    warn!(
                        "Configuration changed since this run started ({} -> {}); resuming anyway",
                        run.config_hash, self.config_hash
                    );
                    run.config_hash = self.config_hash.clone();
                }
                let added = run.sync_pagination(entry);
                let counts = run.counts();
                info!(
                    done = counts.done(),
                    failed = counts.failed,
                    pending = counts.pending,
                    added = added.len(),
                    "Resuming run"
                );
                run
            }
            None => {
                info!(total_pages = entry.total_pages, "Starting new run");
                ScrapeRun::new(entry, &self.config_hash)
            }
        }
    }

    /// Persists the working copy and enters DISPATCH
    fn begin_dispatch(&mut self, run: &ScrapeRun) -> Result<(), ScrapeError> {
        self.store.save(run)?;
        self.transition(OrchestratorState::Dispatch)
    }

    /// Ends an invocation that failed before any page was dispatched
    ///
    /// The report is built from the best known run, so a resumed run still
    /// lists the pages that remain.
    fn stop_before_dispatch(
        &mut self,
        query_key: &str,
        run: Option<&ScrapeRun>,
        cause: ScrapeError,
    ) -> RunReport {
        let status = if self.cancel.is_cancelled() {
            RunStatus::Interrupted
        } else {
            RunStatus::Aborted
        };
        let report = match run {
            Some(run) => RunReport::from_run(run, status),
            None => RunReport::without_run(query_key, status),
        };

        if status == RunStatus::Interrupted {
            info!("Cancelled before dispatch: {}", cause);
            self.force_state(OrchestratorState::Interrupted);
            report
        } else {
            error!("Run aborted: {}", cause);
            self.force_state(OrchestratorState::Aborted);
            report.with_abort_cause(cause.to_string())
        }
    }

    /// DISPATCH / FETCHING / EXTRACTING / RECORD until no work is left
    ///
    /// Cancellation stops dispatch; pages already fetched are still
    /// extracted and recorded. A fatal error also stops dispatch and cancels
    /// in-flight backoff, then the loop drains the pool and records whatever
    /// finished before returning the error.
    async fn process_pages(
        &mut self,
        run: &mut ScrapeRun,
        tracker: &mut PaginationTracker,
    ) -> Result<LoopExit, ScrapeError> {
        let mut queue: VecDeque<PageIndex> = run.pending_pages().into();
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut fatal: Option<ScrapeError> = None;
        let mut skipped = false;
        let mut drift_suspected = false;
        let mut drift_checked = false;

        info!(
            pending = queue.len(),
            total_pages = run.total_pages(),
            "Dispatching pages"
        );

        loop {
            while !self.work_cancel.is_cancelled() && tasks.len() < self.concurrency {
                let Some(page_index) = queue.pop_front() else {
                    break;
                };
                self.transition(OrchestratorState::Fetching)?;
                let fetcher = Arc::clone(&self.fetcher);
                tasks.spawn(async move {
                    TaskOutput::Fetched {
                        page_index,
                        result: fetcher.fetch(page_index).await,
                    }
                });
                self.transition(OrchestratorState::Dispatch)?;
            }

            if tasks.is_empty() {
                if !queue.is_empty() {
                    skipped = true;
                    break;
                }
                if drift_suspected && !drift_checked && !self.work_cancel.is_cancelled() {
                    drift_checked = true;
                    match self.extend_for_drift(run, tracker).await {
                        Ok(added) => queue.extend(added),
                        Err(e) => fatal = Some(e),
                    }
                    if !queue.is_empty() && fatal.is_none() {
                        continue;
                    }
                }
                break;
            }

            let Some(joined) = tasks.join_next().await else {
                continue;
            };

            let handled = match joined {
                Ok(output) => self.handle_output(output, run, &mut tasks, &mut drift_suspected),
                Err(e) => Err(ScrapeError::Worker(e.to_string())),
            };

            match handled {
                Ok(true) => {}
                Ok(false) => skipped = true,
                Err(e) if fatal.is_none() => {
                    error!("Fatal error, stopping dispatch: {}", e);
                    self.work_cancel.cancel();
                    fatal = Some(e);
                }
                Err(e) => warn!("Further error while stopping: {}", e),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None if skipped && self.cancel.is_cancelled() => Ok(LoopExit::Stopped),
            None => Ok(LoopExit::Finished),
        }
    }

    /// Handles one finished task
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The page moved forward or was recorded
    /// * `Ok(false)` - The page was left pending because of cancellation
    /// * `Err(ScrapeError)` - Fatal: auth failure or store failure
    fn handle_output(
        &mut self,
        output: TaskOutput,
        run: &mut ScrapeRun,
        tasks: &mut JoinSet<TaskOutput>,
        drift_suspected: &mut bool,
    ) -> Result<bool, ScrapeError> {
        match output {
            TaskOutput::Fetched {
                page_index,
                result: Ok(page),
            } => {
                if page_index == run.total_pages() && self.inspector.has_next_page(&page.body) {
                    debug!(page = page_index, "Last known page links to a next page");
                    *drift_suspected = true;
                }
                if self.work_cancel.is_cancelled() && !self.cancel.is_cancelled() {
                    debug!(page = page_index, "Stopping after fatal error; page stays pending");
                    return Ok(false);
                }

                self.transition(OrchestratorState::Extracting)?;
                let engine = Arc::clone(&self.engine);
                tasks.spawn(async move {
                    let fetch_retries = page.retries();
                    let result = engine.extract(page.page_index, &page.url, &page.body).await;
                    TaskOutput::Extracted {
                        page_index: page.page_index,
                        fetch_retries,
                        result,
                    }
                });
                self.transition(OrchestratorState::Dispatch)?;
                Ok(true)
            }

            TaskOutput::Fetched {
                page_index,
                result: Err(FetchError::Cancelled { .. }),
            } => {
                debug!(page = page_index, "Fetch cancelled; page stays pending");
                Ok(false)
            }

            TaskOutput::Fetched {
                page_index,
                result: Err(e),
            } => {
                warn!(page = page_index, "Page failed: {}", e);
                let retries = e.attempts().saturating_sub(1);
                self.record(run, PageResult::failed(page_index, e.to_string(), retries))?;
                Ok(true)
            }

            TaskOutput::Extracted {
                page_index,
                fetch_retries,
                result: Ok(outcome),
            } => {
                let quality = outcome.quality();
                let extraction = outcome.into_extraction();
                let retries = fetch_retries + extraction.attempts.saturating_sub(1);
                debug!(
                    page = page_index,
                    listings = extraction.listings.len(),
                    quality = %quality,
                    retries,
                    "Page done"
                );
                self.record(
                    run,
                    PageResult::done(page_index, extraction.listings, quality, retries),
                )?;
                Ok(true)
            }

            TaskOutput::Extracted {
                page_index,
                result: Err(ExtractionError::Cancelled { .. }),
                ..
            } => {
                debug!(page = page_index, "Extraction cancelled; page stays pending");
                Ok(false)
            }

            TaskOutput::Extracted {
                result: Err(e @ ExtractionError::Auth(_)),
                ..
            } => Err(e.into()),

            TaskOutput::Extracted {
                page_index,
                fetch_retries,
                result: Err(e),
            } => {
                warn!(page = page_index, "Page failed: {}", e);
                let retries = fetch_retries + e.attempts().saturating_sub(1);
                self.record(run, PageResult::failed(page_index, e.to_string(), retries))?;
                Ok(true)
            }
        }
    }

    /// RECORD: persists a page result, then updates the working copy
    fn record(&mut self, run: &mut ScrapeRun, result: PageResult) -> Result<(), ScrapeError> {
        self.transition(OrchestratorState::Record)?;

        let allowed = run
            .page(result.page_index)
            .map_or(true, |page| page.status.can_transition_to(result.status));
        let stored = if allowed {
            self.store.mark_page(&run.query_key, &result)
        } else {
            warn!(page = result.page_index, "Page already done; result dropped");
            Ok(())
        };

        self.transition(OrchestratorState::Dispatch)?;
        stored?;
        if allowed {
            run.record(result);
        }
        Ok(())
    }

    /// Extends the run when the last known page turns out not to be last
    ///
    /// Returns the newly added page indices. A failed re-probe keeps the
    /// current page range.
    async fn extend_for_drift(
        &mut self,
        run: &mut ScrapeRun,
        tracker: &mut PaginationTracker,
    ) -> Result<Vec<PageIndex>, ScrapeError> {
        let start = run.total_pages() + 1;
        info!(
            start,
            "Page count drifted upward; re-probing from page {}", start
        );

        if let Err(e) = tracker.invalidate(&run.query_key).await {
            warn!("Failed to invalidate cached page count: {}", e);
        }

        let entry = match tracker.reprobe_from(&run.query_key, start).await {
            Ok(entry) => entry,
            Err(PaginationError::Cache(e)) => return Err(e.into()),
            Err(e) => {
                warn!("Re-probe failed; keeping {} pages: {}", start - 1, e);
                return Ok(Vec::new());
            }
        };

        let added = run.sync_pagination(entry);
        if added.is_empty() {
            info!("No pages beyond {}", start - 1);
        } else {
            info!(added = added.len(), total_pages = run.total_pages(), "Extended run");
            self.store.save(run)?;
        }
        Ok(added)
    }

    fn transition(&mut self, next: OrchestratorState) -> Result<(), ScrapeError> {
        if !self.state.can_transition_to(next) {
            return Err(ScrapeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves to a terminal state, logging if the move is not a valid transition
    fn force_state(&mut self, next: OrchestratorState) {
        if let Err(e) = self.transition(next) {
            debug!("{}", e);
            self.state = next;
        }
    }
}
