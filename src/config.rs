//! Configuration for a dredge run.
//!
//! Sources are layered: an optional TOML file (missing file yields
//! `Config::default()`), then environment variables, then CLI flags
//! applied by the binary. The merged value is constructed once at
//! startup and passed by reference into every component — nothing else
//! in the crate reads ambient process state.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Language filter code that whatlang does not recognize.
    #[error("Unknown language filter code '{0}' (expected ISO 639-3, e.g. \"eng\")")]
    UnknownLanguage(String),

    /// A backend is enabled but has no base URL to talk to.
    #[error("{0} is enabled but has no base URL configured")]
    MissingBaseUrl(&'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Connection settings for one recipe-management backend.
///
/// Custom Debug impl masks `api_token` to prevent secret leakage in
/// logs, error messages, and debug output.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Whether this backend receives imports.
    pub enabled: bool,

    /// Base URL, e.g. `http://localhost:9000`. Trailing slashes are
    /// stripped during normalization.
    pub url: String,

    /// Bearer token. Held as a plain String only inside the config
    /// layer; backend clients wrap it in `SecretString` at wiring time.
    pub api_token: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mealie backend connection.
    pub mealie: BackendConfig,

    /// Tandoor backend connection.
    pub tandoor: BackendConfig,

    /// Scan and classify but never submit imports. Defaults to true so
    /// a fresh install cannot write anywhere by accident.
    pub dry_run: bool,

    /// Stop importing from a site once this many imports succeeded.
    pub target_per_site: usize,

    /// Maximum number of discovered candidates to consider per site.
    pub scan_depth: usize,

    /// Ignore the sitemap cache and re-crawl every site this run.
    pub force_refresh: bool,

    /// ISO 639-3 language code (e.g. "eng"). Pages detected as any
    /// other language are rejected. `None` disables the filter.
    pub language_filter: Option<String>,

    /// Fallback spacing between requests to one domain, in seconds,
    /// used when robots.txt does not name a crawl-delay.
    pub crawl_delay_secs: f64,

    /// Whether to consult robots.txt for per-domain crawl delays.
    pub respect_robots_txt: bool,

    /// Sitemap cache entries older than this many days are re-crawled.
    pub cache_expiry_days: i64,

    /// Directory holding the persisted state files.
    pub data_dir: PathBuf,

    /// Sites to dredge. Empty means "use the built-in fallback list"
    /// (a sites file, if present, takes precedence over both).
    pub sites: Vec<String>,

    /// Merge the backend's existing library into the imported set at
    /// startup so known recipes are never re-submitted.
    pub sync_library: bool,

    /// Webhook receiving the end-of-run summary (Discord/Slack/ntfy
    /// compatible payload). `None` disables notification.
    pub notification_webhook_url: Option<String>,

    /// Worker pool size for the library audit job. Conservative by
    /// default: Mealie's SQLite backend dislikes concurrent writes.
    pub audit_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mealie: BackendConfig {
                enabled: true,
                url: "http://localhost:9000".to_string(),
                api_token: None,
            },
            tandoor: BackendConfig {
                enabled: false,
                url: "http://localhost:8080".to_string(),
                api_token: None,
            },
            dry_run: true,
            target_per_site: 50,
            scan_depth: 1000,
            force_refresh: false,
            language_filter: None,
            crawl_delay_secs: 2.0,
            respect_robots_txt: true,
            cache_expiry_days: 7,
            data_dir: PathBuf::from("data"),
            sites: Vec::new(),
            sync_library: true,
            notification_webhook_url: None,
            audit_workers: 2,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to flag probable typos.
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "mealie",
                "tandoor",
                "dry_run",
                "target_per_site",
                "scan_depth",
                "force_refresh",
                "language_filter",
                "crawl_delay_secs",
                "respect_robots_txt",
                "cache_expiry_days",
                "data_dir",
                "sites",
                "sync_library",
                "notification_webhook_url",
                "audit_workers",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Overlay environment variables onto this config.
    ///
    /// Takes the lookup as a closure so tests can drive it without
    /// mutating process state; the binary passes the real environment.
    pub fn overlay_env_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        fn env_bool(v: &str) -> bool {
            v.trim().eq_ignore_ascii_case("true")
        }

        if let Some(v) = get("MEALIE_ENABLED") {
            self.mealie.enabled = env_bool(&v);
        }
        if let Some(v) = get("MEALIE_URL") {
            self.mealie.url = v;
        }
        if let Some(v) = get("MEALIE_API_TOKEN") {
            self.mealie.api_token = Some(v);
        }
        if let Some(v) = get("TANDOOR_ENABLED") {
            self.tandoor.enabled = env_bool(&v);
        }
        if let Some(v) = get("TANDOOR_URL") {
            self.tandoor.url = v;
        }
        if let Some(v) = get("TANDOOR_API_KEY") {
            self.tandoor.api_token = Some(v);
        }
        if let Some(v) = get("DRY_RUN") {
            self.dry_run = env_bool(&v);
        }
        if let Some(v) = get("TARGET_RECIPES_PER_SITE") {
            if let Ok(n) = v.trim().parse() {
                self.target_per_site = n;
            }
        }
        if let Some(v) = get("SCAN_DEPTH") {
            if let Ok(n) = v.trim().parse() {
                self.scan_depth = n;
            }
        }
        if let Some(v) = get("LANGUAGE_FILTER") {
            let v = v.trim().to_lowercase();
            self.language_filter = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = get("CRAWL_DELAY") {
            if let Ok(n) = v.trim().parse() {
                self.crawl_delay_secs = n;
            }
        }
        if let Some(v) = get("RESPECT_ROBOTS_TXT") {
            self.respect_robots_txt = env_bool(&v);
        }
        if let Some(v) = get("CACHE_EXPIRY_DAYS") {
            if let Ok(n) = v.trim().parse() {
                self.cache_expiry_days = n;
            }
        }
        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SITES") {
            let sites: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !sites.is_empty() {
                self.sites = sites;
            }
        }
        if let Some(v) = get("SYNC_LIBRARY") {
            self.sync_library = env_bool(&v);
        }
        if let Some(v) = get("NOTIFICATION_WEBHOOK_URL") {
            let v = v.trim().to_string();
            self.notification_webhook_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = get("AUDIT_WORKERS") {
            if let Ok(n) = v.trim().parse() {
                self.audit_workers = n;
            }
        }
    }

    /// Overlay environment variables from the real process environment.
    pub fn overlay_env(&mut self) {
        self.overlay_env_with(|key| std::env::var(key).ok());
    }

    /// Normalize and sanity-check the merged configuration.
    ///
    /// Misconfigurations that would silently waste a whole run are
    /// fatal here (unknown language code, enabled backend without a
    /// base URL); softer issues are logged as warnings and the run
    /// proceeds.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.mealie.url = self.mealie.url.trim_end_matches('/').to_string();
        self.tandoor.url = self.tandoor.url.trim_end_matches('/').to_string();

        if let Some(code) = &self.language_filter {
            if whatlang::Lang::from_code(code.as_str()).is_none() {
                return Err(ConfigError::UnknownLanguage(code.clone()));
            }
        }

        if self.mealie.enabled && self.mealie.url.is_empty() {
            return Err(ConfigError::MissingBaseUrl("Mealie"));
        }
        if self.tandoor.enabled && self.tandoor.url.is_empty() {
            return Err(ConfigError::MissingBaseUrl("Tandoor"));
        }

        if !self.mealie.enabled && !self.tandoor.enabled && !self.dry_run {
            tracing::warn!("Both Mealie and Tandoor are disabled. Nothing will be imported!");
        }
        if self.mealie.enabled && self.mealie.api_token.is_none() {
            tracing::warn!("Mealie is enabled but MEALIE_API_TOKEN is not configured");
        }
        if self.tandoor.enabled && self.tandoor.api_token.is_none() {
            tracing::warn!("Tandoor is enabled but TANDOOR_API_KEY is not configured");
        }
        if self.audit_workers == 0 {
            tracing::warn!("audit_workers of 0 makes no progress, raising to 1");
            self.audit_workers = 1;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
