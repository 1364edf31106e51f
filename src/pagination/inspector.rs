//! HTML inspection of results pages
//!
//! Decides whether a page holds listings, whether it links to a next page,
//! and which markup is worth sending to the extraction backend.

use crate::config::PaginationConfig;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};

/// Applies the configured selectors to results page HTML
#[derive(Debug)]
pub struct PageInspector {
    listing: Selector,
    next_page: Option<Selector>,
}

impl PageInspector {
    /// Compiles the listing and next-page selectors
    ///
    /// # Arguments
    ///
    /// * `listing_selector` - Matches one element per listing
    /// * `next_page_selector` - Matches a "next page" link, if the site has one
    pub fn new(listing_selector: &str, next_page_selector: Option<&str>) -> Result<Self, ConfigError> {
        let listing = parse_selector(listing_selector)?;
        let next_page = next_page_selector.map(parse_selector).transpose()?;
        Ok(Self { listing, next_page })
    }

    pub fn from_config(config: &PaginationConfig) -> Result<Self, ConfigError> {
        Self::new(&config.listing_selector, config.next_page_selector.as_deref())
    }

    /// Number of listing elements on the page
    pub fn listing_count(&self, html: &str) -> usize {
        Html::parse_document(html).select(&self.listing).count()
    }

    /// A terminal page is one past the end of results: it has no listings
    pub fn is_terminal(&self, html: &str) -> bool {
        self.listing_count(html) == 0
    }

    /// Returns true if the page links to a following page
    ///
    /// Always false when no next-page selector is configured.
    pub fn has_next_page(&self, html: &str) -> bool {
        let Some(selector) = &self.next_page else {
            return false;
        };
        Html::parse_document(html).select(selector).next().is_some()
    }

    /// Outer HTML of every listing element, in document order
    pub fn listing_fragments(&self, html: &str) -> Vec<String> {
        Html::parse_document(html)
            .select(&self.listing)
            .map(|element| element.html())
            .collect()
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

/// Visible text of a document, skipping scripts and styles
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .map(|parent| {
                matches!(
                    parent.value().name(),
                    "script" | "style" | "noscript" | "template"
                )
            })
            .unwrap_or(false);
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }

    collapse_whitespace(&out)
}

/// Collapses every whitespace run to a single space and trims the ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
