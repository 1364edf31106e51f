//! Shared fixtures: a mock marketplace, a scripted AI backend and configs
//! pointing both at a temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use gunscraper::config::{parse_config, Config};
use gunscraper::crawler::Coordinator;
use gunscraper::extraction::{BackendError, ExtractionBackend, ExtractionRequest};
use gunscraper::model::{
    Confidence, MarketplaceQuery, PageIndex, PageResult, PaginationCacheEntry,
};
use gunscraper::pagination::PaginationCache;
use gunscraper::storage::{
    open_storage, ProgressStore, RunSummary, SqliteProgressStore, StorageError, StorageResult,
};
use gunscraper::ScrapeRun;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config(&self) -> Config {
        let content = format!(
            r#"
[query]
page-url-template = "{uri}/guns/{{page}}.html"

[query.params]
state = "TX"

[pagination]
listing-selector = "div.listing"
max-probe-pages = 50

[fetcher]
timeout-secs = 5
max-attempts = 3
base-delay-ms = 1
max-delay-ms = 20
requests-per-second = 0.0

[extraction]
timeout-secs = 5
max-attempts = 2
retry-delay-ms = 1
requests-per-second = 0.0

[crawler]
max-concurrent-pages = 2

[user-agent]
crawler-name = "GunScraperTest"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "test@example.com"

[output]
database-path = "{db}"
cache-path = "{cache}"
dataset-path = "{dataset}"
"#,
            uri = self.server.uri(),
            db = self.path("progress.db").display(),
            cache = self.path("page_count_cache.json").display(),
            dataset = self.path("scraping_results.json").display(),
        );
        parse_config(&content).unwrap()
    }

    pub fn query_key(&self, config: &Config) -> String {
        MarketplaceQuery::from_config(&config.query)
            .unwrap()
            .key()
            .to_string()
    }

    /// Writes a trusted page count so a run skips probing
    pub async fn seed_cache(&self, config: &Config, total_pages: u32) {
        let key = self.query_key(config);
        let mut cache = PaginationCache::load(&self.path("page_count_cache.json")).await;
        cache
            .put(&PaginationCacheEntry::new(&key, total_pages, Confidence::High))
            .await
            .unwrap();
    }

    pub async fn cached_total(&self, config: &Config) -> Option<u32> {
        let cache = PaginationCache::load(&self.path("page_count_cache.json")).await;
        cache.get(&self.query_key(config)).map(|e| e.total_pages)
    }

    pub fn coordinator(&self, config: Config, backend: Arc<ScriptedBackend>) -> Coordinator {
        self.coordinator_with_cancel(config, backend, CancellationToken::new())
    }

    pub fn coordinator_with_cancel(
        &self,
        config: Config,
        backend: Arc<ScriptedBackend>,
        cancel: CancellationToken,
    ) -> Coordinator {
        let store = open_storage(&self.path("progress.db")).unwrap();
        self.coordinator_with_store(config, backend, Box::new(store), cancel)
    }

    pub fn coordinator_with_store(
        &self,
        config: Config,
        backend: Arc<ScriptedBackend>,
        store: Box<dyn ProgressStore + Send>,
        cancel: CancellationToken,
    ) -> Coordinator {
        Coordinator::new(config, "test-config-hash", backend, store, cancel).unwrap()
    }

    pub fn stored_run(&self, config: &Config) -> ScrapeRun {
        let store = SqliteProgressStore::new(&self.path("progress.db")).unwrap();
        store.load(&self.query_key(config)).unwrap().unwrap()
    }

    pub fn dataset(&self) -> Vec<Value> {
        let text = std::fs::read_to_string(self.path("scraping_results.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    pub fn dataset_exists(&self) -> bool {
        self.path("scraping_results.json").exists()
    }

    /// Mounts results pages `1..=total` with `per_page` listings each
    pub async fn mount_pages(&self, total: PageIndex, per_page: usize) {
        for page in 1..=total {
            Mock::given(method("GET"))
                .and(path(format!("/guns/{}.html", page)))
                .respond_with(listing_page(page, per_page, false))
                .mount(&self.server)
                .await;
        }
    }

    /// Mounts one results page, expecting exactly `hits` requests
    pub async fn mount_page_expecting(&self, page: PageIndex, hits: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/guns/{}.html", page)))
            .respond_with(listing_page(page, 1, false))
            .expect(hits)
            .mount(&self.server)
            .await;
    }
}

/// HTML for a results page; `next` adds a `rel="next"` link
pub fn listing_page(page: PageIndex, per_page: usize, next: bool) -> ResponseTemplate {
    let mut body = String::from("<html><body><h1>Guns for sale</h1>");
    for n in 1..=per_page {
        body.push_str(&format!(
            r#"<div class="listing"><a href="/listing/{page}-{n}">Glock 19 #{page}-{n}</a> <span>$500</span></div>"#
        ));
    }
    if next {
        body.push_str(&format!(r#"<a rel="next" href="/guns/{}.html">Next</a>"#, page + 1));
    }
    body.push_str("</body></html>");
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(body)
}

/// A results page with no listing elements
pub fn empty_page() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string("<html><body><p>No results found.</p></body></html>")
}

pub fn listing_json(id: &str, page: PageIndex, with_gun: bool) -> Value {
    let gun = if with_gun {
        json!({
            "manufacturer": "Glock",
            "model": "19",
            "caliber": "9mm",
            "condition": "used",
            "accessories": ["2 mags"],
            "price": 500,
            "currency": "USD"
        })
    } else {
        Value::Null
    };
    json!({
        "listing_id": id,
        "title": format!("Glock 19 {}", id),
        "price": "$500",
        "url": format!("/listing/{}", id),
        "page_index": page,
        "gun": gun
    })
}

/// The reply a well-behaved model gives for a page: one full listing
pub fn full_page_reply(page: PageIndex) -> String {
    json!({ "listings": [listing_json(&format!("{}-1", page), page, true)] }).to_string()
}

/// An extraction backend with per-page scripted replies
///
/// Pages without a script get [`full_page_reply`].
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<PageIndex, VecDeque<Result<String, BackendError>>>>,
    calls: Mutex<HashMap<PageIndex, u32>>,
    reject_credentials: bool,
    cancel_after: Option<(PageIndex, CancellationToken)>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_credentials() -> Self {
        Self {
            reject_credentials: true,
            ..Self::default()
        }
    }

    pub fn script(self, page: PageIndex, replies: Vec<Result<String, BackendError>>) -> Self {
        self.scripts.lock().unwrap().insert(page, replies.into());
        self
    }

    /// Cancels `token` as soon as `page` has been answered, like a Ctrl-C
    /// arriving mid-run
    pub fn cancelling_after(mut self, page: PageIndex, token: CancellationToken) -> Self {
        self.cancel_after = Some((page, token));
        self
    }

    pub fn calls(&self, page: PageIndex) -> u32 {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ExtractionBackend for ScriptedBackend {
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, BackendError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.page_index)
            .or_insert(0) += 1;

        if self.reject_credentials {
            return Err(BackendError::Auth("HTTP 401: invalid key".to_string()));
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.page_index)
            .and_then(|replies| replies.pop_front());
        let reply = scripted.unwrap_or_else(|| Ok(full_page_reply(request.page_index)));

        if let Some((page, token)) = &self.cancel_after {
            if *page == request.page_index {
                token.cancel();
            }
        }
        reply
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A SQLite store whose writes for one page fail, like a full disk
pub struct FailingStore {
    inner: SqliteProgressStore,
    fail_page: PageIndex,
}

impl FailingStore {
    pub fn open(env: &TestEnv, fail_page: PageIndex) -> Self {
        Self {
            inner: open_storage(&env.path("progress.db")).unwrap(),
            fail_page,
        }
    }
}

impl ProgressStore for FailingStore {
    fn load(&self, query_key: &str) -> StorageResult<Option<ScrapeRun>> {
        self.inner.load(query_key)
    }

    fn save(&mut self, run: &ScrapeRun) -> StorageResult<()> {
        self.inner.save(run)
    }

    fn delete_run(&mut self, query_key: &str) -> StorageResult<bool> {
        self.inner.delete_run(query_key)
    }

    fn list_runs(&self) -> StorageResult<Vec<RunSummary>> {
        self.inner.list_runs()
    }

    fn mark_page(&mut self, query_key: &str, result: &PageResult) -> StorageResult<()> {
        if result.page_index == self.fail_page {
            return Err(StorageError::Database("disk I/O error".to_string()));
        }
        self.inner.mark_page(query_key, result)
    }
}
