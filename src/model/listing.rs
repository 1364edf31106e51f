use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 1-based index of a marketplace results page
pub type PageIndex = u32;

/// The minimal identifying fields of one listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPreview {
    /// Stable marketplace identifier; falls back to the listing URL
    pub listing_id: String,
    pub title: String,
    /// Asking price; `0.0` means unpriced ("make offer")
    pub price: f64,
    /// Absolute listing URL
    pub url: String,
    /// Page the listing was discovered on
    pub page_index: PageIndex,
    /// Seller's description as shown on the results page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Absolute image URLs, in page order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

/// Condition of a firearm as reported by the seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Used,
    RoundsFired,
    Unknown,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::LikeNew => "like_new",
            Self::Used => "used",
            Self::RoundsFired => "rounds_fired",
            Self::Unknown => "unknown",
        }
    }

    /// Parses the loose spellings sellers and models produce
    ///
    /// Case, spaces, hyphens and underscores are ignored, so "Like New",
    /// "like-new" and "LIKE_NEW" all parse. "NA" maps to `Unknown`.
    pub fn parse_loose(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "new" | "nib" | "newinbox" => Some(Self::New),
            "likenew" | "lnib" => Some(Self::LikeNew),
            "used" => Some(Self::Used),
            "roundsfired" => Some(Self::RoundsFired),
            "unknown" | "na" | "n/a" | "" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detailed firearm attributes extracted from a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gun {
    pub manufacturer: String,
    pub model: String,
    pub caliber: String,
    pub condition: Condition,
    #[serde(default)]
    pub accessories: BTreeSet<String>,
    pub price: f64,
    /// Upper-case three-letter currency code
    pub currency: String,
}

/// A listing preview with optional gun details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedListing {
    #[serde(flatten)]
    pub preview: ListingPreview,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gun: Option<Gun>,
}

impl ExtractedListing {
    pub fn preview_only(preview: ListingPreview) -> Self {
        Self { preview, gun: None }
    }

    pub fn listing_id(&self) -> &str {
        &self.preview.listing_id
    }

    pub fn has_details(&self) -> bool {
        self.gun.is_some()
    }
}
