use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Gunscraper
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub query: QueryConfig,
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Number of pages that may be in flight at once
    ///
    /// The smallest of the crawler, fetcher and extraction concurrency limits.
    pub fn effective_concurrency(&self) -> usize {
        self.crawler
            .max_concurrent_pages
            .min(self.fetcher.max_concurrency)
            .min(self.extraction.max_concurrency)
            .max(1) as usize
    }
}

/// The marketplace search being scraped
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Results page URL with a `{page}` placeholder for the page index
    #[serde(rename = "page-url-template")]
    pub page_url_template: String,

    /// Extra query-string parameters appended to every page URL
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// How results pages are probed and inspected
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    /// CSS selector matching one listing element on a results page
    #[serde(rename = "listing-selector")]
    pub listing_selector: String,

    /// CSS selector matching the "next page" link, used for drift detection
    #[serde(rename = "next-page-selector", default = "default_next_page_selector")]
    pub next_page_selector: Option<String>,

    #[serde(rename = "probe-strategy", default)]
    pub probe_strategy: ProbeStrategy,

    /// Upper bound on pages probed during discovery
    #[serde(rename = "max-probe-pages", default = "default_max_probe_pages")]
    pub max_probe_pages: u32,
}

/// Page-count discovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStrategy {
    /// Probe 1, 2, 3, ... until a terminal page
    #[default]
    Linear,
    /// Gallop 1, 2, 4, ... then binary search the boundary
    Exponential,
}

/// Marketplace fetch behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per page, including the first
    #[serde(rename = "max-attempts", default = "default_fetch_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "backoff-factor", default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Token bucket refill rate; 0 disables throttling
    #[serde(rename = "requests-per-second", default = "default_fetch_rps")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(rename = "max-concurrency", default = "default_fetch_concurrency")]
    pub max_concurrency: u32,

    /// HTTP(S) proxy for marketplace requests
    #[serde(rename = "proxy-url", default)]
    pub proxy_url: Option<String>,

    #[serde(rename = "proxy-username", default)]
    pub proxy_username: Option<String>,

    /// Environment variable holding the proxy password
    #[serde(rename = "proxy-password-env", default = "default_proxy_password_env")]
    pub proxy_password_env: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_attempts: default_fetch_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            requests_per_second: default_fetch_rps(),
            burst: default_burst(),
            max_concurrency: default_fetch_concurrency(),
            proxy_url: None,
            proxy_username: None,
            proxy_password_env: default_proxy_password_env(),
        }
    }
}

/// AI extraction backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(rename = "api-base-url", default = "default_api_base_url")]
    pub api_base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(rename = "api-key-env", default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Per-call timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,

    /// Total extraction attempts per page, including the first
    #[serde(rename = "max-attempts", default = "default_extraction_max_attempts")]
    pub max_attempts: u32,

    /// Delay before retrying a failed extraction (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Page content sent to the model is truncated to this many characters
    #[serde(rename = "max-content-chars", default = "default_max_content_chars")]
    pub max_content_chars: usize,

    #[serde(rename = "requests-per-second", default = "default_extraction_rps")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(rename = "max-concurrency", default = "default_extraction_concurrency")]
    pub max_concurrency: u32,

    /// Currency code used when the model does not report one
    #[serde(rename = "default-currency", default = "default_currency")]
    pub default_currency: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: 0.0,
            timeout_secs: default_extraction_timeout_secs(),
            max_attempts: default_extraction_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_content_chars: default_max_content_chars(),
            requests_per_second: default_extraction_rps(),
            burst: default_burst(),
            max_concurrency: default_extraction_concurrency(),
            default_currency: default_currency(),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of pages processed concurrently
    #[serde(rename = "max-concurrent-pages", default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pages: default_max_concurrent_pages(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite progress database
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Path to the page-count cache file
    #[serde(rename = "cache-path", default = "default_cache_path")]
    pub cache_path: String,

    /// Path to the consolidated dataset written on completion
    #[serde(rename = "dataset-path", default = "default_dataset_path")]
    pub dataset_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache_path: default_cache_path(),
            dataset_path: default_dataset_path(),
        }
    }
}

fn default_next_page_selector() -> Option<String> {
    Some(r#"a[rel="next"]"#.to_string())
}

fn default_max_probe_pages() -> u32 {
    500
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_fetch_rps() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    1
}

fn default_fetch_concurrency() -> u32 {
    4
}

fn default_proxy_password_env() -> String {
    "GUNSCRAPER_PROXY_PASSWORD".to_string()
}

fn default_api_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_KEY".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_extraction_timeout_secs() -> u64 {
    120
}

fn default_extraction_max_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_max_content_chars() -> usize {
    60_000
}

fn default_extraction_rps() -> f64 {
    0.5
}

fn default_extraction_concurrency() -> u32 {
    3
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_concurrent_pages() -> u32 {
    3
}

fn default_database_path() -> String {
    "progress.db".to_string()
}

fn default_cache_path() -> String {
    "page_count_cache.json".to_string()
}

fn default_dataset_path() -> String {
    "scraping_results.json".to_string()
}
