//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ProgressStore trait.

use crate::model::{
    Confidence, ExtractedListing, Gun, ListingPreview, PageIndex, PageResult,
    PaginationCacheEntry, ScrapeRun,
};
use crate::state::{ExtractionQuality, PageStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ProgressStore, StorageError, StorageResult};
use crate::storage::RunSummary;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite progress store
pub struct SqliteProgressStore {
    conn: Connection,
}

impl SqliteProgressStore {
    /// Opens or creates a progress database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteProgressStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn load_pages(&self, query_key: &str) -> StorageResult<BTreeMap<PageIndex, PageResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_index, status, quality, attempted_at, error_summary, retry_count
             FROM pages WHERE query_key = ?1 ORDER BY page_index",
        )?;

        let rows = stmt.query_map(params![query_key], |row| {
            Ok((
                row.get::<_, PageIndex>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })?;

        let mut pages = BTreeMap::new();
        for row in rows {
            let (page_index, status, quality, attempted_at, error_summary, retry_count) = row?;

            let status = PageStatus::from_db_string(&status).ok_or_else(|| {
                StorageError::Serialization(format!(
                    "unknown status '{}' for page {}",
                    status, page_index
                ))
            })?;
            let quality = match quality {
                Some(q) => Some(ExtractionQuality::from_db_string(&q).ok_or_else(|| {
                    StorageError::Serialization(format!(
                        "unknown quality '{}' for page {}",
                        q, page_index
                    ))
                })?),
                None => None,
            };
            let attempted_at = attempted_at.as_deref().map(parse_timestamp).transpose()?;

            pages.insert(
                page_index,
                PageResult {
                    page_index,
                    status,
                    listings: Vec::new(),
                    attempted_at,
                    error_summary,
                    retry_count,
                    quality,
                },
            );
        }

        let mut stmt = self.conn.prepare(
            "SELECT page_index, listing_id, title, price, url, gun_json, description, image_urls_json
             FROM listings WHERE query_key = ?1 ORDER BY page_index, position",
        )?;

        let rows = stmt.query_map(params![query_key], |row| {
            Ok((
                row.get::<_, PageIndex>(0)?,
                ListingPreview {
                    listing_id: row.get(1)?,
                    title: row.get(2)?,
                    price: row.get(3)?,
                    url: row.get(4)?,
                    page_index: row.get(0)?,
                    description: row.get(6)?,
                    image_urls: Vec::new(),
                },
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        for row in rows {
            let (page_index, mut preview, gun_json, image_urls_json) = row?;
            let gun = match gun_json {
                Some(json) => Some(serde_json::from_str::<Gun>(&json)?),
                None => None,
            };
            if let Some(json) = image_urls_json {
                preview.image_urls = serde_json::from_str(&json)?;
            }
            if let Some(page) = pages.get_mut(&page_index) {
                page.listings.push(ExtractedListing { preview, gun });
            }
        }

        Ok(pages)
    }
}

impl ProgressStore for SqliteProgressStore {
    // ===== Run Management =====

    fn load(&self, query_key: &str) -> StorageResult<Option<ScrapeRun>> {
        let header = self
            .conn
            .query_row(
                "SELECT total_pages, confidence, discovered_at, config_hash, created_at
                 FROM runs WHERE query_key = ?1",
                params![query_key],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((total_pages, confidence, discovered_at, config_hash, created_at)) = header
        else {
            return Ok(None);
        };

        let confidence = Confidence::from_db_string(&confidence).ok_or_else(|| {
            StorageError::Serialization(format!("unknown confidence '{}'", confidence))
        })?;

        let pagination = PaginationCacheEntry {
            query_key: query_key.to_string(),
            total_pages,
            discovered_at: parse_timestamp(&discovered_at)?,
            confidence,
        };

        let mut run = ScrapeRun {
            query_key: query_key.to_string(),
            pagination: pagination.clone(),
            pages: self.load_pages(query_key)?,
            config_hash,
            created_at: parse_timestamp(&created_at)?,
        };
        // Pages the store never saw are pending
        run.sync_pagination(pagination);

        Ok(Some(run))
    }

    fn save(&mut self, run: &ScrapeRun) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO runs (query_key, total_pages, confidence, discovered_at, config_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(query_key) DO UPDATE SET
                total_pages = excluded.total_pages,
                confidence = excluded.confidence,
                discovered_at = excluded.discovered_at,
                config_hash = excluded.config_hash,
                updated_at = excluded.updated_at",
            params![
                run.query_key,
                run.pagination.total_pages,
                run.pagination.confidence.to_db_string(),
                run.pagination.discovered_at.to_rfc3339(),
                run.config_hash,
                run.created_at.to_rfc3339(),
                now,
            ],
        )?;

        for page in run.pages.values() {
            write_page(&tx, &run.query_key, page)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_run(&mut self, query_key: &str) -> StorageResult<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM listings WHERE query_key = ?1", params![query_key])?;
        tx.execute("DELETE FROM pages WHERE query_key = ?1", params![query_key])?;
        let deleted = tx.execute("DELETE FROM runs WHERE query_key = ?1", params![query_key])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn list_runs(&self) -> StorageResult<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.query_key, r.total_pages, r.confidence, r.config_hash, r.created_at, r.updated_at,
                    COALESCE(SUM(CASE WHEN p.status = 'done' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN p.status = 'failed' THEN 1 ELSE 0 END), 0)
             FROM runs r
             LEFT JOIN pages p ON p.query_key = r.query_key AND p.page_index <= r.total_pages
             GROUP BY r.query_key
             ORDER BY r.updated_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(RunSummary {
                query_key: row.get(0)?,
                total_pages: row.get(1)?,
                confidence: row.get(2)?,
                config_hash: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
                done_pages: row.get(6)?,
                failed_pages: row.get(7)?,
            })
        })?;

        let runs = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Page Management =====

    fn mark_page(&mut self, query_key: &str, result: &PageResult) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM runs WHERE query_key = ?1",
                params![query_key],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::RunNotFound(query_key.to_string()));
        }

        write_page(&tx, query_key, result)?;
        tx.execute(
            "UPDATE runs SET updated_at = ?1 WHERE query_key = ?2",
            params![Utc::now().to_rfc3339(), query_key],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// Upserts a page row and replaces its listings
fn write_page(conn: &Connection, query_key: &str, page: &PageResult) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO pages (query_key, page_index, status, quality, attempted_at, error_summary, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(query_key, page_index) DO UPDATE SET
            status = excluded.status,
            quality = excluded.quality,
            attempted_at = excluded.attempted_at,
            error_summary = excluded.error_summary,
            retry_count = excluded.retry_count",
        params![
            query_key,
            page.page_index,
            page.status.to_db_string(),
            page.quality.map(|q| q.to_db_string()),
            page.attempted_at.map(|t| t.to_rfc3339()),
            page.error_summary,
            page.retry_count,
        ],
    )?;

    conn.execute(
        "DELETE FROM listings WHERE query_key = ?1 AND page_index = ?2",
        params![query_key, page.page_index],
    )?;

    let mut insert = conn.prepare_cached(
        "INSERT INTO listings (query_key, page_index, position, listing_id, title, price, url, gun_json,
                               description, image_urls_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for (position, listing) in page.listings.iter().enumerate() {
        let gun_json = listing
            .gun
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let image_urls_json = if listing.preview.image_urls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&listing.preview.image_urls)?)
        };
        insert.execute(params![
            query_key,
            page.page_index,
            position as i64,
            listing.preview.listing_id,
            listing.preview.title,
            listing.preview.price,
            listing.preview.url,
            gun_json,
            listing.preview.description,
            image_urls_json,
        ])?;
    }

    Ok(())
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}
