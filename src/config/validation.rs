use crate::config::types::{
    Config, CrawlerConfig, ExtractionConfig, FetcherConfig, OutputConfig, PaginationConfig,
    QueryConfig, UserAgentConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_query_config(&config.query)?;
    validate_pagination_config(&config.pagination)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_extraction_config(&config.extraction)?;
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the page URL template
fn validate_query_config(config: &QueryConfig) -> Result<(), ConfigError> {
    if !config.page_url_template.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "page_url_template must contain a {{page}} placeholder, got '{}'",
            config.page_url_template
        )));
    }

    let sample = config.page_url_template.replace("{page}", "1");
    let url = Url::parse(&sample).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "Invalid page_url_template '{}': {}",
            config.page_url_template, e
        ))
    })?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::Validation(format!(
            "page_url_template must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.params.keys().any(|k| k.is_empty()) {
        return Err(ConfigError::Validation(
            "query parameter names cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates selectors and probe limits
fn validate_pagination_config(config: &PaginationConfig) -> Result<(), ConfigError> {
    validate_selector("listing_selector", &config.listing_selector)?;

    if let Some(selector) = &config.next_page_selector {
        validate_selector("next_page_selector", selector)?;
    }

    if config.max_probe_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_probe_pages must be >= 1, got {}",
            config.max_probe_pages
        )));
    }

    Ok(())
}

fn validate_selector(field: &str, selector: &str) -> Result<(), ConfigError> {
    if selector.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", field)));
    }

    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("{} '{}': {:?}", field, selector, e)))
}

/// Validates fetch retry and throttling settings
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "fetcher timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "fetcher max_attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    validate_rate("fetcher", config.requests_per_second, config.burst)?;
    validate_concurrency("fetcher max_concurrency", config.max_concurrency)?;

    match (&config.proxy_url, &config.proxy_username) {
        (Some(proxy_url), _) => {
            let url = Url::parse(proxy_url).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid proxy_url '{}': {}", proxy_url, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::InvalidUrl(format!(
                    "proxy_url must be http or https, got '{}'",
                    proxy_url
                )));
            }
        }
        (None, Some(_)) => {
            return Err(ConfigError::Validation(
                "proxy_username requires proxy_url".to_string(),
            ));
        }
        (None, None) => {}
    }

    if config.proxy_password_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "proxy_password_env cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates AI backend settings
fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    Url::parse(&config.api_base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid api_base_url '{}': {}", config.api_base_url, e))
    })?;

    if config.api_key_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "api_key_env cannot be empty".to_string(),
        ));
    }

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation("model cannot be empty".to_string()));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "extraction timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "extraction max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.max_content_chars < 100 {
        return Err(ConfigError::Validation(format!(
            "max_content_chars must be >= 100, got {}",
            config.max_content_chars
        )));
    }

    let currency = &config.default_currency;
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(format!(
            "default_currency must be a three-letter upper-case code, got '{}'",
            currency
        )));
    }

    validate_rate("extraction", config.requests_per_second, config.burst)?;
    validate_concurrency("extraction max_concurrency", config.max_concurrency)?;

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_concurrency("max_concurrent_pages", config.max_concurrent_pages)
}

fn validate_rate(section: &str, requests_per_second: f64, burst: u32) -> Result<(), ConfigError> {
    if !requests_per_second.is_finite() || requests_per_second < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} requests_per_second must be >= 0, got {}",
            section, requests_per_second
        )));
    }

    if burst < 1 {
        return Err(ConfigError::Validation(format!(
            "{} burst must be >= 1",
            section
        )));
    }

    Ok(())
}

fn validate_concurrency(field: &str, value: u32) -> Result<(), ConfigError> {
    if !(1..=100).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and 100, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (field, value) in [
        ("database_path", &config.database_path),
        ("cache_path", &config.cache_path),
        ("dataset_path", &config.dataset_path),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", field)));
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
