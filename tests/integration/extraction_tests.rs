//! The OpenAI-compatible backend against a mock chat completions API

use gunscraper::crawler::{CallLimiter, RetryPolicy};
use gunscraper::extraction::{
    listing_page_schema, BackendError, ExtractionBackend, ExtractionEngine, ExtractionOutcome,
    ExtractionRequest, OpenAiBackend, EXTRACTION_INSTRUCTIONS,
};
use gunscraper::pagination::PageInspector;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OpenAiBackend {
    OpenAiBackend::new("sk-test")
        .with_model("test-model")
        .with_base_url(format!("{}/v1", server.uri()))
}

fn request() -> ExtractionRequest {
    ExtractionRequest {
        page_index: 1,
        page_url: "https://market.example.com/guns/1.html".to_string(),
        instructions: EXTRACTION_INSTRUCTIONS.to_string(),
        content: r#"<div class="listing"><a href="/listing/7">Glock 19</a> $500</div>"#.to_string(),
        schema: listing_page_schema(),
    }
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    }))
}

#[tokio::test]
async fn test_completion_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "listing_page" }
            }
        })))
        .respond_with(completion(r#"{"listings": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let text = backend(&server).complete(&request()).await.unwrap();
    assert_eq!(text, r#"{"listings": []}"#);
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("context length exceeded"))
        .mount(&server)
        .await;

    let backend = backend(&server);
    assert!(matches!(
        backend.complete(&request()).await,
        Err(BackendError::Auth(_))
    ));
    assert!(matches!(
        backend.complete(&request()).await,
        Err(BackendError::RateLimited { retry_after: Some(d) }) if d == Duration::from_secs(2)
    ));
    assert!(matches!(
        backend.complete(&request()).await,
        Err(BackendError::Transient(_))
    ));
    assert!(matches!(
        backend.complete(&request()).await,
        Err(BackendError::Rejected(message)) if message.contains("context length")
    ));
}

#[tokio::test]
async fn test_engine_retries_through_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let reply = json!({
        "listings": [{
            "listing_id": "7",
            "title": "Glock 19 Gen 5",
            "price": "$500",
            "url": "/listing/7",
            "gun": {
                "manufacturer": "Glock",
                "model": "19 Gen 5",
                "caliber": "9mm",
                "condition": "LNIB"
            }
        }]
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(&reply.to_string()))
        .mount(&server)
        .await;

    let engine = ExtractionEngine::new(
        Arc::new(backend(&server)),
        Arc::new(PageInspector::new("div.listing", None).unwrap()),
        Arc::new(CallLimiter::unlimited("ai")),
        RetryPolicy::new(2, Duration::from_millis(1)),
        CancellationToken::new(),
    );

    let html = r#"<html><body><div class="listing"><a href="/listing/7">Glock 19</a></div></body></html>"#;
    let outcome = engine
        .extract(1, "https://market.example.com/guns/1.html", html)
        .await
        .unwrap();

    let ExtractionOutcome::Success(page) = outcome else {
        panic!("expected full success");
    };
    assert_eq!(page.attempts, 2);
    let listing = &page.listings[0];
    assert_eq!(listing.preview.url, "https://market.example.com/listing/7");
    assert_eq!(listing.preview.price, 500.0);
    assert_eq!(listing.gun.as_ref().unwrap().currency, "USD");
}
