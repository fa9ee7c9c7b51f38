//! Persistent state store: the single owner of every durable
//! collection the pipeline touches.
//!
//! One JSON file per collection under the data directory. Mutations
//! increment a change counter; when it reaches the flush threshold all
//! collections are persisted and the counter resets, bounding data loss
//! on abrupt termination to at most one threshold's worth of changes.
//! `flush()` is also called explicitly at checkpoints (end of each
//! site, end of run, shutdown).
//!
//! A missing or corrupt file at startup degrades to an empty collection
//! with a warning — a damaged cache must never make the whole dredger
//! unable to start. Writes go through a temp-file-then-rename so a
//! crash mid-write leaves the previous file intact.
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::{RetryEntry, RunSummary, SitemapCacheEntry, SiteStats};

const REJECTS_FILE: &str = "rejects.json";
const IMPORTED_FILE: &str = "imported.json";
const RETRY_FILE: &str = "retry_queue.json";
const STATS_FILE: &str = "stats.json";
const SITEMAP_CACHE_FILE: &str = "sitemap_cache.json";
const VERIFIED_FILE: &str = "verified.json";

/// Mutations tolerated between automatic persists.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct StateStore {
    data_dir: PathBuf,

    imported: HashSet<String>,
    rejected: HashSet<String>,
    retry_queue: HashMap<String, RetryEntry>,
    sitemap_cache: HashMap<String, SitemapCacheEntry>,
    stats: HashMap<String, SiteStats>,
    /// Backend entry ids already integrity-checked by the audit job.
    verified: HashSet<String>,

    cache_expiry: Duration,
    flush_threshold: usize,
    changes_since_flush: usize,
}

impl StateStore {
    /// Open the store, creating the data directory if needed and
    /// loading whatever collections are readable.
    pub fn open(data_dir: &Path, cache_expiry_days: i64) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;

        Ok(Self {
            imported: load_collection(&data_dir.join(IMPORTED_FILE)),
            rejected: load_collection(&data_dir.join(REJECTS_FILE)),
            retry_queue: load_collection(&data_dir.join(RETRY_FILE)),
            sitemap_cache: load_collection(&data_dir.join(SITEMAP_CACHE_FILE)),
            stats: load_collection(&data_dir.join(STATS_FILE)),
            verified: load_collection(&data_dir.join(VERIFIED_FILE)),
            data_dir: data_dir.to_path_buf(),
            cache_expiry: Duration::days(cache_expiry_days),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            changes_since_flush: 0,
        })
    }

    /// Override the automatic flush threshold (tests mostly).
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    // ========================================================================
    // Imported / rejected sets
    // ========================================================================

    pub fn is_imported(&self, url: &str) -> bool {
        self.imported.contains(url)
    }

    pub fn is_rejected(&self, url: &str) -> bool {
        self.rejected.contains(url)
    }

    pub fn mark_imported(&mut self, url: &str) {
        if self.imported.insert(url.to_string()) {
            self.bump();
        }
    }

    pub fn mark_rejected(&mut self, url: &str) {
        if self.rejected.insert(url.to_string()) {
            self.bump();
        }
    }

    /// Remove a URL from the imported set. Only the audit job does
    /// this, when it deletes the corresponding entry from a backend
    /// library — a URL must never sit in both the imported and the
    /// rejected set.
    pub fn unmark_imported(&mut self, url: &str) {
        if self.imported.remove(url) {
            self.bump();
        }
    }

    /// Bulk-merge URLs into the imported set (library sync). Counts as
    /// a single change regardless of how many URLs were new.
    pub fn merge_imported(&mut self, urls: impl IntoIterator<Item = String>) -> usize {
        let mut added = 0;
        for url in urls {
            if self.imported.insert(url) {
                added += 1;
            }
        }
        if added > 0 {
            self.bump();
        }
        added
    }

    // ========================================================================
    // Retry queue
    // ========================================================================

    /// Create or refresh a retry entry. A new entry starts at zero
    /// attempts; an existing one keeps its attempt count and gets the
    /// new reason and a fresh timestamp.
    pub fn upsert_retry(&mut self, url: &str, reason: &str) {
        let entry = self
            .retry_queue
            .entry(url.to_string())
            .or_insert_with(|| RetryEntry {
                reason: String::new(),
                attempts: 0,
                last_attempt: None,
            });
        entry.reason = reason.to_string();
        entry.last_attempt = Some(Utc::now());
        self.bump();
    }

    /// Record one completed re-evaluation of a queued URL.
    pub fn note_retry_attempt(&mut self, url: &str) {
        if let Some(entry) = self.retry_queue.get_mut(url) {
            entry.attempts += 1;
            entry.last_attempt = Some(Utc::now());
            self.bump();
        }
    }

    /// Snapshot of the queue, so a retry pass has a stable view of what
    /// was pending when it started.
    pub fn retry_entries(&self) -> Vec<(String, RetryEntry)> {
        self.retry_queue
            .iter()
            .map(|(url, entry)| (url.clone(), entry.clone()))
            .collect()
    }

    pub fn remove_retry(&mut self, url: &str) {
        if self.retry_queue.remove(url).is_some() {
            self.bump();
        }
    }

    // ========================================================================
    // Sitemap cache
    // ========================================================================

    /// Fresh cache entry for a site, or `None` if absent or expired.
    pub fn get_cached_sitemap(&self, site: &str) -> Option<&SitemapCacheEntry> {
        let entry = self.sitemap_cache.get(site)?;
        if Utc::now() - entry.timestamp > self.cache_expiry {
            return None;
        }
        Some(entry)
    }

    /// Replace a site's cache entry wholesale.
    pub fn cache_sitemap(&mut self, site: &str, sitemap_url: &str, urls: Vec<String>) {
        self.sitemap_cache.insert(
            site.to_string(),
            SitemapCacheEntry {
                sitemap_url: sitemap_url.to_string(),
                urls,
                timestamp: Utc::now(),
            },
        );
        self.bump();
    }

    // ========================================================================
    // Stats, verified set, summary
    // ========================================================================

    pub fn record_site_stats(&mut self, site: &str, stats: SiteStats) {
        self.stats.insert(site.to_string(), stats);
        self.bump();
    }

    pub fn is_verified(&self, entry_id: &str) -> bool {
        self.verified.contains(entry_id)
    }

    pub fn mark_verified(&mut self, entry_id: &str) {
        if self.verified.insert(entry_id.to_string()) {
            self.bump();
        }
    }

    pub fn unmark_verified(&mut self, entry_id: &str) {
        if self.verified.remove(entry_id) {
            self.bump();
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            imported: self.imported.len(),
            rejected: self.rejected.len(),
            retry_queue: self.retry_queue.len(),
            cached_sites: self.sitemap_cache.len(),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist every collection to disk and reset the change counter.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        write_json_atomic(
            &self.data_dir.join(IMPORTED_FILE),
            &self.imported.iter().collect::<Vec<_>>(),
        )?;
        write_json_atomic(
            &self.data_dir.join(REJECTS_FILE),
            &self.rejected.iter().collect::<Vec<_>>(),
        )?;
        write_json_atomic(&self.data_dir.join(RETRY_FILE), &self.retry_queue)?;
        write_json_atomic(&self.data_dir.join(SITEMAP_CACHE_FILE), &self.sitemap_cache)?;
        write_json_atomic(&self.data_dir.join(STATS_FILE), &self.stats)?;
        write_json_atomic(
            &self.data_dir.join(VERIFIED_FILE),
            &self.verified.iter().collect::<Vec<_>>(),
        )?;
        self.changes_since_flush = 0;
        Ok(())
    }

    fn bump(&mut self) {
        self.changes_since_flush += 1;
        if self.changes_since_flush >= self.flush_threshold {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "Automatic state flush failed, keeping changes in memory");
            }
        }
    }
}

/// Load one collection, degrading to empty on any problem.
fn load_collection<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read state file, starting empty");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt state file, starting empty");
            T::default()
        }
    }
}

/// Write-to-temp-then-rename so the destination is never left partial.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut temp_file = std::fs::File::create(&temp_path)?;
    temp_file.write_all(&json)?;
    temp_file.sync_all()?;
    drop(temp_file);

    std::fs::rename(&temp_path, path)?;
    Ok(())
}
