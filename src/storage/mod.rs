mod state;
mod types;

pub use state::{StateStore, StorageError, DEFAULT_FLUSH_THRESHOLD};
pub use types::{RetryEntry, RunSummary, SitemapCacheEntry, SiteStats};
