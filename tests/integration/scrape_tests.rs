//! End-to-end scrape runs against a mock marketplace and a scripted backend

use crate::common::{
    empty_page, listing_json, listing_page, FailingStore, ScriptedBackend, TestEnv,
};
use gunscraper::output::RunStatus;
use gunscraper::state::{ExtractionQuality, OrchestratorState};
use gunscraper::PageStatus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_transient_failures_are_retried_and_counted() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 3).await;

    // Page 2 answers 503 twice before succeeding
    Mock::given(method("GET"))
        .and(path("/guns/2.html"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&env.server)
        .await;
    env.mount_pages(3, 1).await;

    // A trusted cached count means no probing past the last page
    Mock::given(method("GET"))
        .and(path("/guns/4.html"))
        .respond_with(empty_page())
        .expect(0)
        .mount(&env.server)
        .await;

    let backend = Arc::new(ScriptedBackend::new());
    let mut coordinator = env.coordinator(config.clone(), backend.clone());
    let report = coordinator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(coordinator.state(), OrchestratorState::Complete);
    assert_eq!(report.counts.full, 3);
    assert_eq!(report.records_written, Some(3));

    let run = env.stored_run(&config);
    assert!(run.is_complete());
    assert_eq!(run.page(1).unwrap().retry_count, 0);
    assert_eq!(run.page(2).unwrap().retry_count, 2);
    assert_eq!(run.page(3).unwrap().retry_count, 0);
    assert_eq!(backend.calls(2), 1);

    let dataset = env.dataset();
    let ids: Vec<_> = dataset.iter().map(|r| r["listing_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1-1", "2-1", "3-1"]);
}

#[tokio::test]
async fn test_resume_only_retries_unfinished_pages() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 3).await;

    env.mount_page_expecting(1, 1).await;
    env.mount_page_expecting(3, 1).await;
    // Every attempt of the first run fails, the second run succeeds
    Mock::given(method("GET"))
        .and(path("/guns/2.html"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .expect(3)
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guns/2.html"))
        .respond_with(listing_page(2, 1, false))
        .expect(1)
        .mount(&env.server)
        .await;

    let first = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), first.clone()).run().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.failed_pages, vec![2]);
    assert_eq!(report.counts.full, 2);
    assert_eq!(env.dataset().len(), 2);

    let stored = env.stored_run(&config);
    let page = stored.page(2).unwrap();
    assert_eq!(page.status, PageStatus::Failed);
    assert_eq!(page.retry_count, 2);
    assert!(page.error_summary.as_deref().unwrap().contains("500"));

    let second = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), second.clone()).run().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.full, 3);
    assert!(report.failed_pages.is_empty());
    assert_eq!(second.calls(1), 0);
    assert_eq!(second.calls(2), 1);
    assert_eq!(second.calls(3), 0);
    assert_eq!(env.dataset().len(), 3);
}

#[tokio::test]
async fn test_rerun_of_complete_run_does_no_work() {
    let env = TestEnv::start().await;
    let config = env.config();

    // Probe (pages 1-2 plus the 404 on page 3) and scrape, once each
    env.mount_page_expecting(1, 2).await;
    env.mount_page_expecting(2, 2).await;

    let first = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), first).run().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(env.cached_total(&config).await, Some(2));
    let first_dataset = std::fs::read_to_string(env.path("scraping_results.json")).unwrap();

    let second = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), second.clone()).run().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.full, 2);
    assert_eq!(second.total_calls(), 0);

    let second_dataset = std::fs::read_to_string(env.path("scraping_results.json")).unwrap();
    assert_eq!(first_dataset, second_dataset);
}

#[tokio::test]
async fn test_failed_page_does_not_block_completion() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 10).await;

    Mock::given(method("GET"))
        .and(path("/guns/5.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&env.server)
        .await;
    env.mount_pages(10, 1).await;

    let backend = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), backend.clone()).run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.failed_pages, vec![5]);
    assert_eq!(report.counts.full, 9);
    assert_eq!(report.counts.pending, 0);
    assert_eq!(report.records_written, Some(9));
    assert_eq!(backend.calls(5), 0);

    let run = env.stored_run(&config);
    assert_eq!(run.page(5).unwrap().retry_count, 0);
}

#[tokio::test]
async fn test_auth_failure_aborts_and_keeps_progress() {
    let env = TestEnv::start().await;
    let mut config = env.config();
    config.crawler.max_concurrent_pages = 1;
    env.seed_cache(&config, 3).await;
    env.mount_pages(3, 1).await;

    let backend = Arc::new(ScriptedBackend::rejecting_credentials());
    let mut coordinator = env.coordinator(config.clone(), backend.clone());
    let report = coordinator.run().await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(coordinator.state(), OrchestratorState::Aborted);
    assert!(!report.is_success());
    assert!(report.abort_cause.as_deref().unwrap().contains("credentials"));
    assert_eq!(report.remaining_pages, vec![1, 2, 3]);
    assert_eq!(backend.total_calls(), 1);
    assert!(!env.dataset_exists());

    let run = env.stored_run(&config);
    assert_eq!(run.pending_pages(), vec![1, 2, 3]);
    assert!(run.failed_pages().is_empty());
}

#[tokio::test]
async fn test_partial_extraction_is_kept() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 1).await;
    env.mount_pages(1, 2).await;

    let reply = json!({ "listings": [listing_json("1-1", 1, false), listing_json("1-2", 1, true)] });
    let backend = Arc::new(ScriptedBackend::new().script(1, vec![Ok(reply.to_string())]));
    let report = env.coordinator(config.clone(), backend).run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.partial, 1);
    assert_eq!(report.counts.full, 0);

    let run = env.stored_run(&config);
    let page = run.page(1).unwrap();
    assert_eq!(page.status, PageStatus::Done);
    assert_eq!(page.quality, Some(ExtractionQuality::Partial));
    assert_eq!(page.listings.len(), 2);

    let dataset = env.dataset();
    assert_eq!(dataset.len(), 2);
    assert!(dataset[0].get("gun").is_none());
    assert_eq!(dataset[1]["gun"]["manufacturer"], "Glock");
    assert_eq!(dataset[1]["gun"]["condition"], "used");
}

#[tokio::test]
async fn test_dataset_keeps_first_occurrence_of_duplicates() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 2).await;
    env.mount_pages(2, 2).await;

    // A listing bumped from page 1 onto page 2 between fetches
    let reply = json!({ "listings": [listing_json("1-1", 2, true), listing_json("2-1", 2, true)] });
    let backend = Arc::new(ScriptedBackend::new().script(2, vec![Ok(reply.to_string())]));
    let report = env.coordinator(config, backend).run().await;

    assert_eq!(report.records_written, Some(2));
    assert_eq!(report.duplicates_dropped, 1);

    let dataset = env.dataset();
    assert_eq!(dataset[0]["listing_id"], "1-1");
    assert_eq!(dataset[0]["page_index"], 1);
    assert_eq!(dataset[1]["listing_id"], "2-1");
}

#[tokio::test]
async fn test_unusable_extraction_marks_page_failed() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 2).await;
    env.mount_pages(2, 1).await;

    let backend = Arc::new(ScriptedBackend::new().script(
        2,
        vec![Ok("I could not find any listings.".to_string()), Ok("{}".to_string())],
    ));
    let report = env.coordinator(config.clone(), backend.clone()).run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.failed_pages, vec![2]);
    assert_eq!(backend.calls(2), 2);

    let run = env.stored_run(&config);
    let page = run.page(2).unwrap();
    assert_eq!(page.status, PageStatus::Failed);
    assert_eq!(page.retry_count, 1);
    assert!(page.listings.is_empty());
}

#[tokio::test]
async fn test_run_extends_when_page_count_drifts_upward() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 2).await;

    Mock::given(method("GET"))
        .and(path("/guns/1.html"))
        .respond_with(listing_page(1, 1, true))
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/guns/2.html"))
        .respond_with(listing_page(2, 1, true))
        .mount(&env.server)
        .await;
    // Probed once during the re-probe, then scraped
    Mock::given(method("GET"))
        .and(path("/guns/3.html"))
        .respond_with(listing_page(3, 1, false))
        .expect(2)
        .mount(&env.server)
        .await;

    let backend = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), backend).run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total_pages, 3);
    assert_eq!(report.counts.full, 3);
    assert_eq!(env.dataset().len(), 3);
    assert_eq!(env.cached_total(&config).await, Some(3));
    assert_eq!(env.stored_run(&config).total_pages(), 3);
}

#[tokio::test]
async fn test_cancelled_run_is_interrupted_without_dataset() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 3).await;
    env.mount_pages(3, 1).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let backend = Arc::new(ScriptedBackend::new());
    let mut coordinator = env.coordinator_with_cancel(config.clone(), backend.clone(), cancel);
    let report = coordinator.run().await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(coordinator.state(), OrchestratorState::Interrupted);
    assert!(report.is_success());
    assert_eq!(report.remaining_pages, vec![1, 2, 3]);
    assert_eq!(backend.total_calls(), 0);
    assert!(!env.dataset_exists());

    // The run was persisted, so the next invocation resumes it
    assert_eq!(env.stored_run(&config).pending_pages(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_fresh_run_discards_progress() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.mount_pages(2, 1).await;

    let first = Arc::new(ScriptedBackend::new());
    env.coordinator(config.clone(), first).run().await;

    let second = Arc::new(ScriptedBackend::new());
    let report = env
        .coordinator(config.clone(), second.clone())
        .with_fresh(true)
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.full, 2);
    assert_eq!(second.total_calls(), 2);
}

#[tokio::test]
async fn test_empty_query_aborts() {
    let env = TestEnv::start().await;
    let config = env.config();
    Mock::given(method("GET"))
        .and(path("/guns/1.html"))
        .respond_with(empty_page())
        .mount(&env.server)
        .await;

    let backend = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config, backend.clone()).run().await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.abort_cause.as_deref().unwrap().contains("no results"));
    assert_eq!(backend.total_calls(), 0);
    assert!(!env.dataset_exists());
}

#[tokio::test]
async fn test_interrupted_and_resumed_run_matches_uninterrupted_run() {
    let env = TestEnv::start().await;
    let mut config = env.config();
    config.crawler.max_concurrent_pages = 1;
    env.mount_pages(4, 1).await;

    let reference = env
        .coordinator(config.clone(), Arc::new(ScriptedBackend::new()))
        .run()
        .await;
    assert_eq!(reference.status, RunStatus::Completed);
    let expected = env.dataset();
    assert_eq!(expected.len(), 4);
    std::fs::remove_file(env.path("scraping_results.json")).unwrap();

    // Same input from scratch, stopped right after page 2 is extracted
    let cancel = CancellationToken::new();
    let backend = Arc::new(ScriptedBackend::new().cancelling_after(2, cancel.clone()));
    let report = env
        .coordinator_with_cancel(config.clone(), backend.clone(), cancel)
        .with_fresh(true)
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.remaining_pages, vec![3, 4]);
    assert_eq!(backend.calls(3), 0);
    assert!(!env.dataset_exists());
    assert_eq!(env.stored_run(&config).pending_pages(), vec![3, 4]);

    let resumed = Arc::new(ScriptedBackend::new());
    let report = env.coordinator(config.clone(), resumed.clone()).run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(resumed.calls(1), 0);
    assert_eq!(resumed.calls(2), 0);
    assert_eq!(resumed.calls(3), 1);
    assert_eq!(resumed.calls(4), 1);
    assert_eq!(env.dataset(), expected);
}

#[tokio::test]
async fn test_cancellation_lets_in_flight_pages_finish() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 6).await;

    // Page 1 is still downloading when page 2's extraction cancels the run
    Mock::given(method("GET"))
        .and(path("/guns/1.html"))
        .respond_with(listing_page(1, 1, false).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&env.server)
        .await;
    env.mount_pages(6, 1).await;

    let cancel = CancellationToken::new();
    let backend = Arc::new(ScriptedBackend::new().cancelling_after(2, cancel.clone()));
    let mut coordinator = env.coordinator_with_cancel(config.clone(), backend.clone(), cancel);
    let report = coordinator.run().await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(coordinator.state(), OrchestratorState::Interrupted);
    assert_eq!(backend.calls(1), 1);
    assert_eq!(report.counts.full, 2);
    assert_eq!(report.remaining_pages, vec![3, 4, 5, 6]);
    assert!(!env.dataset_exists());

    let stored = env.stored_run(&config);
    assert_eq!(stored.page(1).unwrap().status, PageStatus::Done);
    assert_eq!(stored.page(1).unwrap().listings.len(), 1);
    assert_eq!(stored.page(2).unwrap().status, PageStatus::Done);
    assert_eq!(stored.pending_pages(), report.remaining_pages);
}

#[tokio::test]
async fn test_store_failure_aborts_run() {
    let env = TestEnv::start().await;
    let mut config = env.config();
    config.crawler.max_concurrent_pages = 1;
    env.seed_cache(&config, 3).await;
    env.mount_pages(3, 1).await;

    let backend = Arc::new(ScriptedBackend::new());
    let store = Box::new(FailingStore::open(&env, 2));
    let mut coordinator =
        env.coordinator_with_store(config.clone(), backend.clone(), store, CancellationToken::new());
    let report = coordinator.run().await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(coordinator.state(), OrchestratorState::Aborted);
    assert!(report.abort_cause.as_deref().unwrap().contains("disk I/O error"));
    assert_eq!(report.remaining_pages, vec![2, 3]);
    assert_eq!(backend.calls(3), 0);
    assert!(!env.dataset_exists());

    let stored = env.stored_run(&config);
    assert_eq!(stored.page(1).unwrap().status, PageStatus::Done);
    assert_eq!(stored.pending_pages(), vec![2, 3]);
}

#[tokio::test]
async fn test_failed_discovery_reports_stored_progress() {
    let env = TestEnv::start().await;
    let config = env.config();
    env.seed_cache(&config, 3).await;
    env.mount_pages(2, 1).await;
    Mock::given(method("GET"))
        .and(path("/guns/3.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&env.server)
        .await;

    let report = env
        .coordinator(config.clone(), Arc::new(ScriptedBackend::new()))
        .run()
        .await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.failed_pages, vec![3]);

    // The cached count is gone and the marketplace now refuses every request
    std::fs::remove_file(env.path("page_count_cache.json")).unwrap();
    env.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&env.server)
        .await;

    let backend = Arc::new(ScriptedBackend::new());
    let mut coordinator = env.coordinator(config.clone(), backend.clone());
    let report = coordinator.run().await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(coordinator.state(), OrchestratorState::Aborted);
    assert!(report.abort_cause.as_deref().unwrap().contains("HTTP 403"));
    assert_eq!(report.total_pages, 3);
    assert_eq!(report.counts.full, 2);
    assert_eq!(report.failed_pages, vec![3]);
    assert_eq!(report.remaining_pages, vec![3]);
    assert_eq!(report.remaining_pages, env.stored_run(&config).pending_pages());
    assert_eq!(backend.total_calls(), 0);

    // A cancelled invocation that fails the same way still lists what remains
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = env
        .coordinator_with_cancel(config.clone(), backend, cancel)
        .run()
        .await;
    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(report.abort_cause.is_none());
    assert_eq!(report.remaining_pages, vec![3]);
}
