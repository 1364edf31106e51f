//! Page-count discovery against a mock marketplace

use crate::common::{empty_page, TestEnv};
use gunscraper::config::{Config, ProbeStrategy};
use gunscraper::crawler::{build_http_client, CallLimiter, PageFetcher, RetryPolicy};
use gunscraper::model::{Confidence, MarketplaceQuery};
use gunscraper::pagination::{PageInspector, PaginationError, PaginationTracker, ProbeSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

async fn open_tracker(env: &TestEnv, config: &Config, strategy: ProbeStrategy, cap: u32) -> PaginationTracker {
    let query = Arc::new(MarketplaceQuery::from_config(&config.query).unwrap());
    let timeout = Duration::from_secs(config.fetcher.timeout_secs);
    let fetcher = PageFetcher::new(
        build_http_client(&config.user_agent, &config.fetcher).unwrap(),
        query,
        RetryPolicy::new(1, Duration::from_millis(1)),
        Arc::new(CallLimiter::unlimited("test")),
        timeout,
        CancellationToken::new(),
    );
    let inspector = PageInspector::from_config(&config.pagination).unwrap();

    PaginationTracker::open(
        &env.path("page_count_cache.json"),
        Arc::new(fetcher),
        Arc::new(inspector),
        ProbeSettings {
            strategy,
            max_probe_pages: cap,
        },
    )
    .await
}

#[tokio::test]
async fn test_linear_probe_then_cache_hit() {
    let env = TestEnv::start().await;
    let config = env.config();
    let key = env.query_key(&config);
    env.mount_pages(4, 1).await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Linear, 50).await;
    let entry = tracker.discover(&key).await.unwrap();
    assert_eq!(entry.total_pages, 4);
    assert_eq!(entry.confidence, Confidence::High);
    assert_eq!(tracker.probe_count(), 5);

    // Second discovery is served from the cache
    let again = tracker.discover(&key).await.unwrap();
    assert_eq!(again.total_pages, 4);
    assert_eq!(tracker.probe_count(), 5);

    // And so is discovery from a freshly opened tracker
    let mut reopened = open_tracker(&env, &config, ProbeStrategy::Linear, 50).await;
    assert_eq!(reopened.cached(&key).map(|e| e.total_pages), Some(4));
    reopened.discover(&key).await.unwrap();
    assert_eq!(reopened.probe_count(), 0);
}

#[tokio::test]
async fn test_empty_listing_page_is_terminal() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.mount_pages(2, 3).await;
    Mock::given(method("GET"))
        .and(path("/guns/3.html"))
        .respond_with(empty_page())
        .mount(&env.server)
        .await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Linear, 50).await;
    let entry = tracker.discover(&env.query_key(&config)).await.unwrap();
    assert_eq!(entry.total_pages, 2);
    assert_eq!(entry.confidence, Confidence::High);
}

#[tokio::test]
async fn test_exponential_probe_finds_boundary() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.mount_pages(6, 1).await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Exponential, 50).await;
    let entry = tracker.discover(&env.query_key(&config)).await.unwrap();

    assert_eq!(entry.total_pages, 6);
    assert_eq!(entry.confidence, Confidence::High);
    // 1, 2, 4, 8 then bisecting 6 and 7
    assert_eq!(tracker.probe_count(), 6);
}

#[tokio::test]
async fn test_exponential_probe_stops_at_cap() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.mount_pages(10, 1).await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Exponential, 5).await;
    let entry = tracker.discover(&env.query_key(&config)).await.unwrap();

    assert_eq!(entry.total_pages, 5);
    assert_eq!(entry.confidence, Confidence::Low);
}

#[tokio::test]
async fn test_linear_cap_gives_low_confidence_and_reprobes() {
    let env = TestEnv::start().await;
    let config = env.config();
    let key = env.query_key(&config);
    env.mount_pages(5, 1).await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Linear, 3).await;
    let entry = tracker.discover(&key).await.unwrap();
    assert_eq!(entry.total_pages, 3);
    assert_eq!(entry.confidence, Confidence::Low);
    assert_eq!(tracker.probe_count(), 3);

    // A low-confidence entry is not trusted
    tracker.discover(&key).await.unwrap();
    assert_eq!(tracker.probe_count(), 6);
}

#[tokio::test]
async fn test_empty_first_page_is_no_results() {
    let env = TestEnv::start().await;
    let config = env.config();
    Mock::given(method("GET"))
        .and(path("/guns/1.html"))
        .respond_with(empty_page())
        .mount(&env.server)
        .await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Linear, 50).await;
    let err = tracker.discover(&env.query_key(&config)).await.unwrap_err();
    assert!(matches!(err, PaginationError::NoResults { .. }));
    assert!(tracker.cached(&env.query_key(&config)).is_none());
}

#[tokio::test]
async fn test_probe_failure_is_an_error() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.mount_pages(1, 1).await;
    Mock::given(method("GET"))
        .and(path("/guns/2.html"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&env.server)
        .await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Linear, 50).await;
    let err = tracker.discover(&env.query_key(&config)).await.unwrap_err();
    match err {
        PaginationError::Probe { page_index, source } => {
            assert_eq!(page_index, 2);
            assert_eq!(source.status(), Some(403));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_reprobe_from_extends_count() {
    let env = TestEnv::start().await;
    let config = env.config();
    let key = env.query_key(&config);
    env.mount_pages(5, 1).await;

    let mut tracker = open_tracker(&env, &config, ProbeStrategy::Linear, 50).await;
    assert!(!tracker.invalidate(&key).await.unwrap());

    let entry = tracker.reprobe_from(&key, 4).await.unwrap();
    assert_eq!(entry.total_pages, 5);
    assert_eq!(entry.confidence, Confidence::High);
    // Pages 4, 5 and the 404 on 6
    assert_eq!(tracker.probe_count(), 3);
    assert_eq!(tracker.cached(&key).map(|e| e.total_pages), Some(5));

    assert!(tracker.invalidate(&key).await.unwrap());
    assert!(tracker.cached(&key).is_none());
}
