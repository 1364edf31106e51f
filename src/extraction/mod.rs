//! AI-assisted listing extraction
//!
//! This module turns fetched results pages into validated listings:
//! - Preparing page content for the model
//! - The backend trait and the OpenAI-compatible implementation
//! - Strict validation of whatever the model returns
//! - Bounded retries and partial-success classification

mod backend;
mod content;
mod engine;
mod openai;
mod schema;
mod validate;

pub use backend::{BackendError, ExtractionBackend, ExtractionRequest};
pub use content::prepare_content;
pub use engine::{ExtractionEngine, ExtractionError, ExtractionOutcome, PageExtraction};
pub use openai::OpenAiBackend;
pub use schema::{listing_page_schema, EXTRACTION_INSTRUCTIONS};
pub use validate::{parse_price, parse_response, ParsedPage, ValidationError};
