/// Page status definitions for tracking scrape progress
///
/// A page moves from `Pending` to either `Done` or `Failed`. Failed pages are
/// retried on the next invocation, so `Failed -> Done` is also legal.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a results page within a scrape run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Page has not been attempted, or its attempt was interrupted
    Pending,

    /// Page was fetched and extracted; its listings are durable
    Done,

    /// Fetch or extraction failed permanently for this invocation
    Failed,
}

impl PageStatus {
    /// Returns true once the page never needs to be processed again
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if the page is eligible for dispatch
    pub fn needs_work(&self) -> bool {
        !self.is_done()
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: PageStatus) -> bool {
        match (self, next) {
            (Self::Pending, _) => true,
            (Self::Failed, Self::Done | Self::Failed | Self::Pending) => true,
            (Self::Done, Self::Done) => true,
            (Self::Done, _) => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible page statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![Self::Pending, Self::Done, Self::Failed]
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// How much of a done page's content was extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionQuality {
    /// Every listing carries gun details
    Full,

    /// At least one listing has only preview fields
    Partial,
}

impl ExtractionQuality {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
