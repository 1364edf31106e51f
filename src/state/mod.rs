//! State module for tracking scrape progress
//!
//! # Components
//!
//! - `PageStatus`: Lifecycle of a single results page (pending, done, failed)
//! - `ExtractionQuality`: Whether a done page carries full or partial details
//! - `OrchestratorState`: The coordinator's run-level state machine

mod orchestrator_state;
mod page_state;

pub use orchestrator_state::OrchestratorState;
pub use page_state::{ExtractionQuality, PageStatus};
