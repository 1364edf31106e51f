//! The AI backend seam
//!
//! The engine hands a backend prepared page content plus a JSON schema and
//! gets raw text back. Backends only classify failures; parsing and
//! validation belong to the engine.

use crate::model::PageIndex;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One extraction call
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub page_index: PageIndex,
    pub page_url: String,
    /// Instructions for the model
    pub instructions: String,
    /// Prepared page content
    pub content: String,
    /// JSON schema the response should follow
    pub schema: serde_json::Value,
}

/// Classified backend failure
#[derive(Debug, Error)]
pub enum BackendError {
    /// Credentials rejected; no page can succeed
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx, network failure or timeout
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// A 4xx other than auth or rate limiting
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The response envelope had no usable content
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// An AI provider able to turn page content into JSON text
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Sends one request, returning the model's raw output text
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, BackendError>;

    /// Short provider name used in logs
    fn name(&self) -> &str;
}
