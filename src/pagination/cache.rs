//! Persistent page-count cache
//!
//! Maps each query key to its discovered page count. The file is advisory:
//! a missing or unreadable cache simply means probing again.

use crate::model::{Confidence, PaginationCacheEntry};
use crate::storage::{read_json, write_json_atomic, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    total_pages: u32,
    confidence: Confidence,
    discovered_at: DateTime<Utc>,
}

/// The `page_count_cache.json` file and its in-memory copy
#[derive(Debug)]
pub struct PaginationCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheRecord>,
}

impl PaginationCache {
    /// Loads the cache file, starting empty if it is missing or corrupt
    pub async fn load(path: &Path) -> Self {
        let entries = match read_json::<BTreeMap<String, CacheRecord>>(path).await {
            Ok(Some(entries)) => {
                debug!(path = %path.display(), entries = entries.len(), "Loaded page count cache");
                entries
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable page count cache");
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, query_key: &str) -> Option<PaginationCacheEntry> {
        self.entries
            .get(query_key)
            .map(|record| PaginationCacheEntry {
                query_key: query_key.to_string(),
                total_pages: record.total_pages,
                discovered_at: record.discovered_at,
                confidence: record.confidence,
            })
    }

    /// Stores an entry and rewrites the cache file
    pub async fn put(&mut self, entry: &PaginationCacheEntry) -> StorageResult<()> {
        self.entries.insert(
            entry.query_key.clone(),
            CacheRecord {
                total_pages: entry.total_pages,
                confidence: entry.confidence,
                discovered_at: entry.discovered_at,
            },
        );
        self.flush().await
    }

    /// Drops an entry, returning true if one existed
    pub async fn invalidate(&mut self, query_key: &str) -> StorageResult<bool> {
        if self.entries.remove(query_key).is_none() {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn flush(&self) -> StorageResult<()> {
        write_json_atomic(&self.path, &self.entries).await
    }
}
