//! Serialized shapes of the persisted collections.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of a verified recipe whose import failed transiently.
///
/// Keyed by URL in the retry queue. `attempts` counts completed
/// re-evaluations; once it reaches the coordinator's budget the URL is
/// converted to a permanent rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub reason: String,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Wholesale-cached result of one site's sitemap discovery.
///
/// Replaced in full on refresh, never merged. Entries past the
/// configured expiry are treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapCacheEntry {
    pub sitemap_url: String,
    pub urls: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Write-only per-site counters, accumulated within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteStats {
    pub recipes_found: u64,
    pub recipes_imported: u64,
    pub recipes_rejected: u64,
    pub errors: u64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Final summary record emitted for external reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunSummary {
    pub imported: usize,
    pub rejected: usize,
    pub retry_queue: usize,
    pub cached_sites: usize,
}
