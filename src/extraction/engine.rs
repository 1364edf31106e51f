//! Page extraction with bounded retries
//!
//! Turns one fetched page into validated listings. Calls are throttled by
//! their own token bucket, independent of the marketplace limiter.

use crate::config::ExtractionConfig;
use crate::crawler::{CallLimiter, RetryPolicy};
use crate::extraction::backend::{BackendError, ExtractionBackend, ExtractionRequest};
use crate::extraction::content::prepare_content;
use crate::extraction::schema::{listing_page_schema, EXTRACTION_INSTRUCTIONS};
use crate::extraction::validate::parse_response;
use crate::model::{ExtractedListing, PageIndex};
use crate::pagination::PageInspector;
use crate::state::ExtractionQuality;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Listings recovered from one page
#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub listings: Vec<ExtractedListing>,
    /// Backend calls made, including the successful one
    pub attempts: u32,
    /// Records or gun details dropped by validation
    pub rejected: usize,
}

/// A page that yielded at least one valid listing
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// Every listing has validated gun details
    Success(PageExtraction),
    /// Some listings lack gun details or some records were dropped
    Partial(PageExtraction),
}

impl ExtractionOutcome {
    pub fn quality(&self) -> ExtractionQuality {
        match self {
            Self::Success(_) => ExtractionQuality::Full,
            Self::Partial(_) => ExtractionQuality::Partial,
        }
    }

    pub fn extraction(&self) -> &PageExtraction {
        match self {
            Self::Success(page) | Self::Partial(page) => page,
        }
    }

    pub fn into_extraction(self) -> PageExtraction {
        match self {
            Self::Success(page) | Self::Partial(page) => page,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Nothing usable came back within the attempt budget
    #[error("extraction of page {page_index} failed after {attempts} attempt(s): {reason}")]
    Total {
        page_index: PageIndex,
        attempts: u32,
        reason: String,
    },

    /// Credentials rejected; fatal for the run
    #[error("AI backend rejected credentials: {0}")]
    Auth(String),

    #[error("extraction of page {page_index} cancelled")]
    Cancelled { page_index: PageIndex, attempts: u32 },
}

impl ExtractionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Total { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
            Self::Auth(_) => 1,
        }
    }
}

pub struct ExtractionEngine {
    backend: Arc<dyn ExtractionBackend>,
    inspector: Arc<PageInspector>,
    limiter: Arc<CallLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
    max_content_chars: usize,
    default_currency: String,
    instructions: String,
    schema: Value,
    cancel: CancellationToken,
}

impl ExtractionEngine {
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        inspector: Arc<PageInspector>,
        limiter: Arc<CallLimiter>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let defaults = ExtractionConfig::default();
        Self {
            backend,
            inspector,
            limiter,
            retry,
            timeout: Duration::from_secs(defaults.timeout_secs),
            max_content_chars: defaults.max_content_chars,
            default_currency: defaults.default_currency,
            instructions: EXTRACTION_INSTRUCTIONS.to_string(),
            schema: listing_page_schema(),
            cancel,
        }
    }

    /// Builds an engine from `[extraction]`, with its own rate limiter
    pub fn from_config(
        config: &ExtractionConfig,
        backend: Arc<dyn ExtractionBackend>,
        inspector: Arc<PageInspector>,
        cancel: CancellationToken,
    ) -> Self {
        let limiter = Arc::new(CallLimiter::new(
            "ai",
            config.requests_per_second,
            config.burst,
        ));
        Self::new(
            backend,
            inspector,
            limiter,
            RetryPolicy::from_extraction_config(config),
            cancel,
        )
        .with_timeout(Duration::from_secs(config.timeout_secs))
        .with_max_content_chars(config.max_content_chars)
        .with_default_currency(&config.default_currency)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_content_chars(mut self, max_chars: usize) -> Self {
        self.max_content_chars = max_chars;
        self
    }

    pub fn with_default_currency(mut self, currency: &str) -> Self {
        self.default_currency = currency.to_string();
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Extracts the listings of one fetched page
    ///
    /// # Failure handling
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Valid listings, all with gun details | `Success` |
    /// | Valid listings, some without gun details | `Partial` |
    /// | Malformed, empty or all-invalid response | Retry within budget |
    /// | Backend transient, timeout, rate limit | Retry within budget |
    /// | Backend rejected the request (4xx) | `Total` without retry |
    /// | Backend auth failure | `Auth`, fatal |
    ///
    /// # Arguments
    ///
    /// * `page_index` - Page being extracted
    /// * `page_url` - URL the page was fetched from, used to resolve links
    /// * `html` - Raw page body
    pub async fn extract(
        &self,
        page_index: PageIndex,
        page_url: &str,
        html: &str,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let base = Url::parse(page_url).map_err(|e| ExtractionError::Total {
            page_index,
            attempts: 0,
            reason: format!("invalid page URL: {}", e),
        })?;

        let content = prepare_content(&self.inspector, html, self.max_content_chars);
        if content.trim().is_empty() {
            return Err(ExtractionError::Total {
                page_index,
                attempts: 0,
                reason: "page has no content".to_string(),
            });
        }

        let request = ExtractionRequest {
            page_index,
            page_url: page_url.to_string(),
            instructions: self.instructions.clone(),
            content,
            schema: self.schema.clone(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.until_ready().await;
            debug!(
                page = page_index,
                attempt,
                backend = self.backend.name(),
                "Extracting page"
            );

            let (reason, hint) = match tokio::time::timeout(self.timeout, self.backend.complete(&request)).await {
                Err(_) => (format!("backend timed out after {:?}", self.timeout), None),
                Ok(Err(BackendError::Auth(message))) => return Err(ExtractionError::Auth(message)),
                Ok(Err(BackendError::Rejected(message))) => {
                    return Err(ExtractionError::Total {
                        page_index,
                        attempts: attempt,
                        reason: message,
                    })
                }
                Ok(Err(BackendError::RateLimited { retry_after })) => {
                    ("backend rate limited".to_string(), retry_after)
                }
                Ok(Err(e)) => (e.to_string(), None),
                Ok(Ok(text)) => {
                    match parse_response(&text, page_index, &base, &self.default_currency) {
                        Ok(parsed) if !parsed.listings.is_empty() => {
                            let quality = parsed.quality();
                            let page = PageExtraction {
                                rejected: parsed.rejected.len(),
                                listings: parsed.listings,
                                attempts: attempt,
                            };
                            return Ok(match quality {
                                ExtractionQuality::Full => ExtractionOutcome::Success(page),
                                ExtractionQuality::Partial => {
                                    warn!(
                                        page = page_index,
                                        listings = page.listings.len(),
                                        rejected = page.rejected,
                                        "Partial extraction"
                                    );
                                    ExtractionOutcome::Partial(page)
                                }
                            });
                        }
                        Ok(parsed) if parsed.rejected.is_empty() => {
                            ("response contained no listings".to_string(), None)
                        }
                        Ok(parsed) => (
                            format!("all {} records failed validation", parsed.rejected.len()),
                            None,
                        ),
                        Err(e) => (e.to_string(), None),
                    }
                }
            };

            if !self.retry.allows_retry(attempt) {
                return Err(ExtractionError::Total {
                    page_index,
                    attempts: attempt,
                    reason,
                });
            }

            let delay = match hint {
                Some(hint) => self.retry.cap(hint),
                None => self.retry.delay_for_attempt(attempt),
            };
            warn!(
                page = page_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Extraction attempt failed, retrying: {}",
                reason
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    return Err(ExtractionError::Cancelled { page_index, attempts: attempt });
                }
            }
        }
    }
}
