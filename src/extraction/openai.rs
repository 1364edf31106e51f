//! OpenAI-compatible chat completions backend
//!
//! Works against OpenAI itself or any compatible gateway such as OpenRouter.
//! Requests use the `json_schema` response format.

use crate::config::ExtractionConfig;
use crate::crawler::parse_retry_after;
use crate::extraction::backend::{BackendError, ExtractionBackend, ExtractionRequest};
use crate::ConfigError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

/// Chat completions client
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiBackend {
    /// Create a backend with the given API key and default settings
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = ExtractionConfig::default();
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: defaults.api_base_url,
            model: defaults.model,
            temperature: 0.0,
        }
    }

    /// Builds a backend from config, reading the key from the named env var
    pub fn from_config(config: &ExtractionConfig, user_agent: &str) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv(config.api_key_env.clone()))?;

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation(format!("cannot build AI client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API base URL; a trailing slash is dropped
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ExtractionBackend for OpenAiBackend {
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.instructions,
                },
                Message {
                    role: "user",
                    content: &request.content,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "listing_page",
                    strict: false,
                    schema: &request.schema,
                },
            },
        };

        debug!(
            page = request.page_index,
            model = %self.model,
            chars = request.content.len(),
            "Calling AI backend"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("X-Title", "gunscraper")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            warn!(page = request.page_index, status = %status, "AI backend error");
            return Err(classify_http_error(status, retry_after, text));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("failed to read response: {}", e)))?;

        parse_completion(&payload)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

fn classify_http_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> BackendError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited { retry_after },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => BackendError::Transient(detail),
        _ => BackendError::Rejected(detail),
    }
}

/// Pulls `choices[0].message.content` out of a completion payload
///
/// Some gateways answer 200 with an `error` object; it is classified by its
/// embedded code.
fn parse_completion(payload: &Value) -> Result<String, BackendError> {
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(match error.get("code").and_then(Value::as_u64) {
            Some(401) | Some(403) => BackendError::Auth(message),
            Some(429) => BackendError::RateLimited { retry_after: None },
            Some(code) if (400..500).contains(&code) => BackendError::Rejected(message),
            _ => BackendError::Transient(message),
        });
    }

    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BackendError::Malformed("no message content in completion".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
