//! Integration tests for gunscraper
//!
//! These tests use wiremock to stand in for the marketplace and the AI
//! backend, and drive full scrape runs end-to-end.

mod common;
mod extraction_tests;
mod fetch_tests;
mod pagination_tests;
mod scrape_tests;
