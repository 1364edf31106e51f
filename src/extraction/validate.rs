//! Strict validation of model output
//!
//! Nothing the model returns is trusted. Each record is checked field by
//! field; a bad preview drops the record, a bad gun drops only the details.

use crate::model::{Condition, ExtractedListing, Gun, ListingPreview, PageIndex};
use crate::state::ExtractionQuality;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response has no listings array")]
    MissingListings,

    #[error("listing {index}: {reason}")]
    Record { index: usize, reason: String },

    #[error("gun details of listing {index}: {reason}")]
    Gun { index: usize, reason: String },
}

/// Validated records of one page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub listings: Vec<ExtractedListing>,
    /// Records or gun details that failed validation
    pub rejected: Vec<ValidationError>,
}

impl ParsedPage {
    /// Number of listings kept without gun details
    pub fn missing_details(&self) -> usize {
        self.listings.iter().filter(|l| !l.has_details()).count()
    }

    pub fn quality(&self) -> ExtractionQuality {
        if self.rejected.is_empty() && self.missing_details() == 0 {
            ExtractionQuality::Full
        } else {
            ExtractionQuality::Partial
        }
    }
}

/// Parses and validates a model response for one page
///
/// The response may be `{"listings": [...]}` or a bare array, optionally
/// wrapped in a Markdown code fence.
///
/// # Arguments
///
/// * `text` - Raw model output
/// * `page_index` - Page the records belong to
/// * `page_url` - Base for resolving relative listing URLs
/// * `default_currency` - Used when a gun has no currency
///
/// # Returns
///
/// * `Ok(ParsedPage)` - Valid records plus what was rejected
/// * `Err(ValidationError)` - The response as a whole is unusable
pub fn parse_response(
    text: &str,
    page_index: PageIndex,
    page_url: &Url,
    default_currency: &str,
) -> Result<ParsedPage, ValidationError> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ValidationError::NotJson(e.to_string()))?;

    let records = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("listings") {
            Some(Value::Array(items)) => items,
            _ => return Err(ValidationError::MissingListings),
        },
        _ => return Err(ValidationError::MissingListings),
    };

    let mut page = ParsedPage::default();
    for (index, record) in records.iter().enumerate() {
        let Some(object) = record.as_object() else {
            page.rejected.push(ValidationError::Record {
                index,
                reason: "not an object".to_string(),
            });
            continue;
        };

        let preview = match validate_preview(object, page_index, page_url) {
            Ok(preview) => preview,
            Err(reason) => {
                debug!(page = page_index, index, "Rejected listing: {}", reason);
                page.rejected.push(ValidationError::Record { index, reason });
                continue;
            }
        };

        let gun = match object.get("gun") {
            None | Some(Value::Null) => None,
            Some(Value::Object(gun)) => match validate_gun(gun, preview.price, default_currency) {
                Ok(gun) => Some(gun),
                Err(reason) => {
                    debug!(page = page_index, index, "Dropped gun details: {}", reason);
                    page.rejected.push(ValidationError::Gun { index, reason });
                    None
                }
            },
            Some(_) => {
                page.rejected.push(ValidationError::Gun {
                    index,
                    reason: "not an object".to_string(),
                });
                None
            }
        };

        page.listings.push(ExtractedListing { preview, gun });
    }

    Ok(page)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn validate_preview(
    object: &Map<String, Value>,
    page_index: PageIndex,
    page_url: &Url,
) -> Result<ListingPreview, String> {
    let title = required_str(object, "title")?;

    let raw_url = required_str(object, "url")?;
    let url = page_url
        .join(&raw_url)
        .map_err(|e| format!("invalid url '{}': {}", raw_url, e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("url '{}' is not http(s)", url));
    }

    let price = match object.get("price") {
        Some(value) => parse_price(value)?,
        None => return Err("missing price".to_string()),
    };

    let listing_id = match object.get("listing_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        None | Some(Value::Null) | Some(Value::String(_)) => url.to_string(),
        Some(_) => return Err("listing_id must be a string".to_string()),
    };

    let description = match object.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => return Err("description must be a string".to_string()),
    };

    let image_urls = match object.get("image_urls") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => resolve_image_urls(items, page_url)?,
        Some(_) => return Err("image_urls must be an array".to_string()),
    };

    Ok(ListingPreview {
        listing_id,
        title,
        price,
        url: url.to_string(),
        page_index,
        description,
        image_urls,
    })
}

/// Resolves image links against the page URL, dropping unusable and repeated ones
fn resolve_image_urls(items: &[Value], page_url: &Url) -> Result<Vec<String>, String> {
    let mut urls: Vec<String> = Vec::new();
    for item in items {
        let raw = item
            .as_str()
            .ok_or_else(|| "image_urls must be strings".to_string())?
            .trim();
        if raw.is_empty() {
            continue;
        }
        match page_url.join(raw) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                let url = url.to_string();
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
            _ => debug!("Dropping image url '{}'", raw),
        }
    }
    Ok(urls)
}

fn validate_gun(
    object: &Map<String, Value>,
    listing_price: f64,
    default_currency: &str,
) -> Result<Gun, String> {
    let manufacturer = required_str(object, "manufacturer")?;
    let model = required_str(object, "model")?;
    let caliber = required_str(object, "caliber")?;

    let condition = match object.get("condition") {
        None | Some(Value::Null) => Condition::Unknown,
        Some(Value::String(s)) => Condition::parse_loose(s).unwrap_or(Condition::Unknown),
        Some(_) => return Err("condition must be a string".to_string()),
    };

    let accessories = match object.get("accessories") {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => {
            let mut set = BTreeSet::new();
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| "accessories must be strings".to_string())?
                    .trim();
                if !s.is_empty() {
                    set.insert(s.to_string());
                }
            }
            set
        }
        Some(_) => return Err("accessories must be an array".to_string()),
    };

    let price = match object.get("price") {
        None | Some(Value::Null) => listing_price,
        Some(value) => parse_price(value)?,
    };

    let currency = normalize_currency(object.get("currency"), default_currency)?;

    Ok(Gun {
        manufacturer,
        model,
        caliber,
        condition,
        accessories,
        price,
        currency,
    })
}

fn required_str(object: &Map<String, Value>, field: &str) -> Result<String, String> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(format!("{} is empty", field)),
        Some(Value::Null) | None => Err(format!("missing {}", field)),
        Some(_) => Err(format!("{} must be a string", field)),
    }
}

/// Normalizes a price given as a number or a display string
///
/// `"$1,250.00"` becomes `1250.0`. A string without digits ("Make offer",
/// "Trade only") and `null` mean unpriced and become `0.0`. Ranges keep
/// their first figure.
pub fn parse_price(value: &Value) -> Result<f64, String> {
    let price = match value {
        Value::Null => 0.0,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("price {} is not representable", n))?,
        Value::String(s) => {
            let Some(start) = s.find(|c: char| c.is_ascii_digit()) else {
                return Ok(0.0);
            };
            let figure: String = s[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
                .filter(|c| *c != ',')
                .collect();
            figure
                .trim_end_matches('.')
                .parse::<f64>()
                .map_err(|_| format!("unparseable price '{}'", s))?
        }
        _ => return Err("price must be a number or string".to_string()),
    };

    if !price.is_finite() || price < 0.0 {
        return Err(format!("price {} is out of range", price));
    }
    Ok(price)
}

fn normalize_currency(value: Option<&Value>, default_currency: &str) -> Result<String, String> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(default_currency.to_string()),
        Some(Value::String(s)) => s.trim(),
        Some(_) => return Err("currency must be a string".to_string()),
    };

    let code = match raw {
        "" => default_currency,
        "$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        other => other,
    };

    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(format!("invalid currency '{}'", raw))
    }
}
