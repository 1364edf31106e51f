use crate::config::QueryConfig;
use crate::model::PageIndex;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// A marketplace search, identified by a stable query key
#[derive(Debug, Clone)]
pub struct MarketplaceQuery {
    template: String,
    params: BTreeMap<String, String>,
    key: String,
}

impl MarketplaceQuery {
    /// Builds a query from its page URL template and extra parameters
    ///
    /// # Arguments
    ///
    /// * `template` - Results page URL containing a `{page}` placeholder
    /// * `params` - Query-string parameters appended to every page URL
    ///
    /// # Returns
    ///
    /// * `Ok(MarketplaceQuery)` - The query and its derived key
    /// * `Err(ConfigError)` - The template is missing its placeholder or is not a URL
    pub fn new(template: &str, params: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        if !template.contains("{page}") {
            return Err(ConfigError::Validation(format!(
                "page URL template '{}' has no {{page}} placeholder",
                template
            )));
        }

        let key = compute_query_key(template, &params);
        let query = Self {
            template: template.to_string(),
            params,
            key,
        };
        query
            .page_url(1)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", template, e)))?;
        Ok(query)
    }

    pub fn from_config(config: &QueryConfig) -> Result<Self, ConfigError> {
        Self::new(&config.page_url_template, config.params.clone())
    }

    /// The stable key naming this search in the cache and progress store
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Builds the URL of a results page
    pub fn page_url(&self, page_index: PageIndex) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.template.replace("{page}", &page_index.to_string()))?;
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.params {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

/// Computes the SHA-256 query key of a template and its sorted parameters
pub fn compute_query_key(template: &str, params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.trim().as_bytes());
    for (name, value) in params {
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}
