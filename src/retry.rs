//! Retry coordination: re-evaluate previously failed imports on a
//! cooldown, with a bounded attempt budget.
//!
//! An entry is due when it has never been attempted or its last attempt
//! is at least one cooldown in the past. An entry that already spent
//! its attempt budget converts straight to a permanent rejection,
//! skipping re-evaluation. Resolved entries leave the queue at the end
//! of the pass, so one pass works from a stable snapshot of what was
//! pending when it started.
use chrono::{Duration, Utc};

use crate::backend::Dispatcher;
use crate::crawl::RateLimiter;
use crate::shutdown::ShutdownToken;
use crate::storage::StateStore;
use crate::verify::{Verdict, Verifier};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_COOLDOWN_HOURS: i64 = 1;

pub struct RetryCoordinator {
    max_attempts: u32,
    cooldown: Duration,
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            cooldown: Duration::hours(RETRY_COOLDOWN_HOURS),
        }
    }

    /// Non-default budget and cooldown, for tuning and tests.
    pub fn with_limits(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            cooldown,
        }
    }

    /// Process every due retry entry. Returns how many imports
    /// succeeded this pass.
    pub async fn process_due(
        &self,
        store: &mut StateStore,
        limiter: &RateLimiter,
        verifier: &Verifier,
        dispatcher: &mut Dispatcher,
        shutdown: &ShutdownToken,
    ) -> usize {
        let snapshot = store.retry_entries();
        if snapshot.is_empty() {
            return 0;
        }

        let now = Utc::now();
        let mut imported = 0usize;
        let mut completed: Vec<String> = Vec::new();
        let mut eligible: Vec<String> = Vec::new();

        for (url, entry) in snapshot {
            // Budget exhaustion converts immediately, cooldown or not.
            if entry.attempts >= self.max_attempts {
                tracing::info!(
                    url = %url,
                    attempts = entry.attempts,
                    "Retry budget exhausted, rejecting permanently"
                );
                store.mark_rejected(&url);
                completed.push(url);
                continue;
            }
            if let Some(last) = entry.last_attempt {
                if now - last < self.cooldown {
                    continue;
                }
            }
            eligible.push(url);
        }

        if !eligible.is_empty() {
            tracing::info!(count = eligible.len(), "Processing retries from previous runs");
        }

        for url in eligible {
            if shutdown.is_triggered() {
                break;
            }

            limiter.wait_if_needed(&url).await;

            match verifier.verify(&url).await {
                Verdict::Recipe => {
                    if dispatcher.import(limiter, &url).await {
                        store.mark_imported(&url);
                        imported += 1;
                        completed.push(url);
                    } else {
                        store.note_retry_attempt(&url);
                    }
                }
                Verdict::Rejected(reason) => {
                    tracing::debug!(
                        url = %url,
                        reason = %reason,
                        "No longer verifies as a recipe, rejecting permanently"
                    );
                    store.mark_rejected(&url);
                    completed.push(url);
                }
                Verdict::Unverifiable(reason) => {
                    // Transient again; costs an attempt but stays queued.
                    tracing::debug!(url = %url, reason = %reason, "Still unverifiable");
                    store.note_retry_attempt(&url);
                }
            }
        }

        let resolved = completed.len();
        for url in &completed {
            store.remove_retry(url);
        }

        if resolved > 0 {
            tracing::info!(
                imported,
                rejected = resolved - imported,
                "Retry pass resolved entries"
            );
        }
        imported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, Config};
    use crate::crawl::RateLimiter;
    use crate::http::build_client;
    use chrono::Utc;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RECIPE_PAGE: &str = r#"<html><head><title>Stew</title></head>
<body><script type="application/ld+json">{"@type":"Recipe"}</script><p>Simmer.</p></body></html>"#;

    fn seed_retry_queue(data_dir: &Path, url: &str, attempts: u32, hours_ago: i64) {
        let queue = serde_json::json!({
            url: {
                "reason": "HTTP 500",
                "attempts": attempts,
                "last_attempt": (Utc::now() - Duration::hours(hours_ago)).to_rfc3339(),
            }
        });
        std::fs::write(
            data_dir.join("retry_queue.json"),
            serde_json::to_string(&queue).unwrap(),
        )
        .unwrap();
    }

    fn dry_run_dispatcher() -> Dispatcher {
        let mut config = Config::default();
        config.dry_run = true;
        Dispatcher::from_config(&build_client().unwrap(), &config)
    }

    fn live_dispatcher(mealie_url: &str) -> Dispatcher {
        let mut config = Config::default();
        config.dry_run = false;
        config.mealie = BackendConfig {
            enabled: true,
            url: mealie_url.to_string(),
            api_token: Some("token".to_string()),
        };
        Dispatcher::from_config(&build_client().unwrap(), &config)
    }

    fn no_delay_limiter() -> RateLimiter {
        RateLimiter::new(build_client().unwrap(), 0.0, false)
    }

    fn verifier() -> Verifier {
        Verifier::new(build_client().unwrap(), None)
    }

    #[tokio::test]
    async fn test_exhausted_budget_converts_without_reevaluation() {
        let dir = tempfile::tempdir().unwrap();
        // Last attempt was seconds ago — the cooldown has NOT elapsed,
        // but the budget is spent, so conversion happens anyway.
        seed_retry_queue(dir.path(), "https://a.example/stew", 3, 0);
        let mut store = StateStore::open(dir.path(), 7).unwrap();

        let coordinator = RetryCoordinator::new();
        let imported = coordinator
            .process_due(
                &mut store,
                &no_delay_limiter(),
                &verifier(),
                &mut dry_run_dispatcher(),
                &ShutdownToken::new(),
            )
            .await;

        assert_eq!(imported, 0);
        assert!(store.is_rejected("https://a.example/stew"));
        assert!(store.retry_entries().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_not_elapsed_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        seed_retry_queue(dir.path(), "https://a.example/stew", 1, 0);
        let mut store = StateStore::open(dir.path(), 7).unwrap();

        let coordinator = RetryCoordinator::new();
        let imported = coordinator
            .process_due(
                &mut store,
                &no_delay_limiter(),
                &verifier(),
                &mut dry_run_dispatcher(),
                &ShutdownToken::new(),
            )
            .await;

        assert_eq!(imported, 0);
        // Untouched: still queued, attempts unchanged.
        let entries = store.retry_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.attempts, 1);
    }

    #[tokio::test]
    async fn test_due_entry_that_verifies_and_imports_is_resolved() {
        let site = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stew"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
            .mount(&site)
            .await;

        let url = format!("{}/stew", site.uri());
        let dir = tempfile::tempdir().unwrap();
        seed_retry_queue(dir.path(), &url, 1, 2);
        let mut store = StateStore::open(dir.path(), 7).unwrap();

        let coordinator = RetryCoordinator::new();
        let imported = coordinator
            .process_due(
                &mut store,
                &no_delay_limiter(),
                &verifier(),
                &mut dry_run_dispatcher(),
                &ShutdownToken::new(),
            )
            .await;

        assert_eq!(imported, 1);
        assert!(store.is_imported(&url));
        assert!(store.retry_entries().is_empty());
    }

    #[tokio::test]
    async fn test_due_entry_that_no_longer_verifies_is_rejected() {
        let site = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stew"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>Page removed.</p></body></html>"),
            )
            .mount(&site)
            .await;

        let url = format!("{}/stew", site.uri());
        let dir = tempfile::tempdir().unwrap();
        seed_retry_queue(dir.path(), &url, 0, 2);
        let mut store = StateStore::open(dir.path(), 7).unwrap();

        let coordinator = RetryCoordinator::new();
        coordinator
            .process_due(
                &mut store,
                &no_delay_limiter(),
                &verifier(),
                &mut dry_run_dispatcher(),
                &ShutdownToken::new(),
            )
            .await;

        assert!(store.is_rejected(&url));
        assert!(store.retry_entries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_import_increments_and_stays_queued() {
        let site = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stew"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
            .mount(&site)
            .await;
        let mealie = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/recipes/create/url"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&mealie)
            .await;

        let url = format!("{}/stew", site.uri());
        let dir = tempfile::tempdir().unwrap();
        seed_retry_queue(dir.path(), &url, 1, 2);
        let mut store = StateStore::open(dir.path(), 7).unwrap();

        let coordinator = RetryCoordinator::new();
        let imported = coordinator
            .process_due(
                &mut store,
                &no_delay_limiter(),
                &verifier(),
                &mut live_dispatcher(&mealie.uri()),
                &ShutdownToken::new(),
            )
            .await;

        assert_eq!(imported, 0);
        let entries = store.retry_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.attempts, 2);
        assert!(!store.is_rejected(&url));
    }

    #[tokio::test]
    async fn test_entry_without_last_attempt_is_due() {
        let site = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stew"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
            .mount(&site)
            .await;

        let url = format!("{}/stew", site.uri());
        let dir = tempfile::tempdir().unwrap();
        let queue = serde_json::json!({
            &url: {"reason": "HTTP 500", "attempts": 0, "last_attempt": null}
        });
        std::fs::write(
            dir.path().join("retry_queue.json"),
            serde_json::to_string(&queue).unwrap(),
        )
        .unwrap();
        let mut store = StateStore::open(dir.path(), 7).unwrap();

        let coordinator = RetryCoordinator::new();
        let imported = coordinator
            .process_due(
                &mut store,
                &no_delay_limiter(),
                &verifier(),
                &mut dry_run_dispatcher(),
                &ShutdownToken::new(),
            )
            .await;

        assert_eq!(imported, 1);
    }
}
