//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the progress database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per scrape run, keyed by query
CREATE TABLE IF NOT EXISTS runs (
    query_key TEXT PRIMARY KEY,
    total_pages INTEGER NOT NULL,
    confidence TEXT NOT NULL,
    discovered_at TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Status of every results page in a run
CREATE TABLE IF NOT EXISTS pages (
    query_key TEXT NOT NULL REFERENCES runs(query_key) ON DELETE CASCADE,
    page_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    quality TEXT,
    attempted_at TEXT,
    error_summary TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (query_key, page_index)
);

CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(query_key, status);

-- Listings extracted from done pages, in discovery order
CREATE TABLE IF NOT EXISTS listings (
    query_key TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    position INTEGER NOT NULL,
    listing_id TEXT NOT NULL,
    title TEXT NOT NULL,
    price REAL NOT NULL,
    url TEXT NOT NULL,
    gun_json TEXT,
    description TEXT,
    image_urls_json TEXT,
    PRIMARY KEY (query_key, page_index, position),
    FOREIGN KEY (query_key, page_index)
        REFERENCES pages(query_key, page_index) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_listings_id ON listings(query_key, listing_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 1 {
        conn.execute_batch(MIGRATE_V1_TO_V2)?;
    }
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 2;

/// Version 2 adds the preview description and image URLs
const MIGRATE_V1_TO_V2: &str = r#"
ALTER TABLE listings ADD COLUMN description TEXT;
ALTER TABLE listings ADD COLUMN image_urls_json TEXT;
"#;
