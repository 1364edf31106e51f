//! HTTP fetcher implementation
//!
//! This module handles all marketplace requests, including:
//! - Building HTTP clients with proper user agent strings and an optional proxy
//! - Token-bucket throttling before every request
//! - Classifying failures as transient or permanent
//! - Exponential backoff for transient failures, honouring `Retry-After`

use crate::config::{FetcherConfig, UserAgentConfig};
use crate::crawler::limiter::CallLimiter;
use crate::crawler::retry::RetryPolicy;
use crate::model::{MarketplaceQuery, PageIndex};
use crate::{ConfigError, ScrapeError};
use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Proxy, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure fetching a results page
#[derive(Debug, Error)]
pub enum FetchError {
    /// Retries were exhausted on a timeout, 5xx, 429 or connection error
    #[error("page {page_index} failed after {attempts} attempt(s): {message}")]
    Transient {
        page_index: PageIndex,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    /// A 4xx other than 408/429, or a URL that cannot be built
    #[error("page {page_index} failed permanently: {message}")]
    Permanent {
        page_index: PageIndex,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    /// Cancellation arrived while waiting to retry
    #[error("fetch of page {page_index} cancelled")]
    Cancelled { page_index: PageIndex, attempts: u32 },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status of the final attempt, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
            Self::Cancelled { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Transient { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Returns true for the statuses that mark a page past the end of results
    pub fn is_missing_page(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Classifies a non-success HTTP status
pub fn classify_status(status: StatusCode) -> FailureClass {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

/// Parses a `Retry-After` header given as seconds or an HTTP date
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = when.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// A successfully fetched results page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub page_index: PageIndex,
    pub url: String,
    pub body: String,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

impl FetchedPage {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug)]
enum AttemptFailure {
    Transient {
        status: Option<u16>,
        retry_after: Option<Duration>,
        message: String,
    },
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

/// Builds the marketplace proxy from `[fetcher]`
///
/// The password is read from the environment variable named by
/// `proxy-password-env`, and only when a username is configured.
///
/// # Returns
///
/// * `Ok(None)` - No proxy configured
/// * `Ok(Some(Proxy))` - Proxy for all marketplace traffic
/// * `Err(ConfigError)` - Bad proxy URL or missing password variable
pub fn marketplace_proxy(config: &FetcherConfig) -> Result<Option<Proxy>, ConfigError> {
    let Some(proxy_url) = config.proxy_url.as_deref() else {
        return Ok(None);
    };

    let mut proxy = Proxy::all(proxy_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy_url '{}': {}", proxy_url, e)))?;

    if let Some(username) = config.proxy_username.as_deref() {
        let password = std::env::var(&config.proxy_password_env)
            .map_err(|_| ConfigError::MissingEnv(config.proxy_password_env.clone()))?;
        proxy = proxy.basic_auth(username, &password);
    }

    Ok(Some(proxy))
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `fetcher` - Timeout and proxy settings
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ScrapeError)` - Invalid proxy settings or client build failure
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    fetcher: &FetcherConfig,
) -> Result<Client, ScrapeError> {
    let timeout = Duration::from_secs(fetcher.timeout_secs);
    let mut builder = Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = marketplace_proxy(fetcher)? {
        debug!("Marketplace requests go through the configured proxy");
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Fetches marketplace results pages with retries
pub struct PageFetcher {
    client: Client,
    query: Arc<MarketplaceQuery>,
    retry: RetryPolicy,
    limiter: Arc<CallLimiter>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl PageFetcher {
    pub fn new(
        client: Client,
        query: Arc<MarketplaceQuery>,
        retry: RetryPolicy,
        limiter: Arc<CallLimiter>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            query,
            retry,
            limiter,
            timeout,
            cancel,
        }
    }

    pub fn query(&self) -> &MarketplaceQuery {
        &self.query
    }

    /// Fetches one results page
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 2xx | Return body |
    /// | HTTP 5xx, 408, timeout, connection error | Retry with exponential backoff |
    /// | HTTP 429 | Retry after `Retry-After` (capped), else backoff |
    /// | Other 4xx | Fail immediately |
    /// | Malformed URL | Fail immediately |
    ///
    /// # Arguments
    ///
    /// * `page_index` - The 1-based page to fetch
    ///
    /// # Returns
    ///
    /// * `Ok(FetchedPage)` - Body and the number of attempts it took
    /// * `Err(FetchError)` - Classified failure
    pub async fn fetch(&self, page_index: PageIndex) -> Result<FetchedPage, FetchError> {
        let url = self
            .query
            .page_url(page_index)
            .map_err(|e| FetchError::Permanent {
                page_index,
                attempts: 0,
                status: None,
                message: format!("malformed page URL: {}", e),
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.until_ready().await;
            debug!(page = page_index, attempt, url = %url, "Fetching page");

            let (status, retry_after, message) = match self.attempt(&url).await {
                Ok(body) => {
                    return Ok(FetchedPage {
                        page_index,
                        url: url.to_string(),
                        body,
                        attempts: attempt,
                    })
                }
                Err(AttemptFailure::Permanent { status, message }) => {
                    return Err(FetchError::Permanent {
                        page_index,
                        attempts: attempt,
                        status,
                        message,
                    })
                }
                Err(AttemptFailure::Transient {
                    status,
                    retry_after,
                    message,
                }) => (status, retry_after, message),
            };

            if !self.retry.allows_retry(attempt) {
                return Err(FetchError::Transient {
                    page_index,
                    attempts: attempt,
                    status,
                    message,
                });
            }

            let delay = match retry_after {
                Some(hint) => self.retry.cap(hint),
                None => self.retry.delay_for_attempt(attempt),
            };
            warn!(
                page = page_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Transient fetch failure, retrying: {}",
                message
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::Cancelled { page_index, attempts: attempt });
                }
            }
        }
    }

    async fn attempt(&self, url: &url::Url) -> Result<String, AttemptFailure> {
        let response = match tokio::time::timeout(self.timeout, self.client.get(url.clone()).send())
            .await
        {
            Err(_) => {
                return Err(AttemptFailure::Transient {
                    status: None,
                    retry_after: None,
                    message: format!("request timed out after {:?}", self.timeout),
                })
            }
            Ok(Err(e)) => return Err(classify_request_error(&e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {}", status.as_u16());
            return Err(match classify_status(status) {
                FailureClass::Transient => AttemptFailure::Transient {
                    status: Some(status.as_u16()),
                    retry_after: parse_retry_after(response.headers()),
                    message,
                },
                FailureClass::Permanent => AttemptFailure::Permanent {
                    status: Some(status.as_u16()),
                    message,
                },
            });
        }

        match tokio::time::timeout(self.timeout, response.text()).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(AttemptFailure::Transient {
                status: Some(status.as_u16()),
                retry_after: None,
                message: format!("failed to read body: {}", e),
            }),
            Err(_) => Err(AttemptFailure::Transient {
                status: Some(status.as_u16()),
                retry_after: None,
                message: "timed out reading body".to_string(),
            }),
        }
    }
}

fn classify_request_error(e: &reqwest::Error) -> AttemptFailure {
    if e.is_builder() {
        AttemptFailure::Permanent {
            status: None,
            message: format!("invalid request: {}", e),
        }
    } else if e.is_timeout() {
        AttemptFailure::Transient {
            status: None,
            retry_after: None,
            message: "request timed out".to_string(),
        }
    } else if e.is_connect() {
        AttemptFailure::Transient {
            status: None,
            retry_after: None,
            message: format!("connection failed: {}", e),
        }
    } else {
        AttemptFailure::Transient {
            status: None,
            retry_after: None,
            message: e.to_string(),
        }
    }
}
