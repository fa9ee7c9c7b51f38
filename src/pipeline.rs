//! The run loop: one sequential flow of control over sites and
//! candidates.
//!
//! Per run: the retry queue drains first, then each site's candidates
//! flow through pacing → verification → dispatch, with the terminal
//! outcome recorded in the state store. URLs already imported or
//! rejected are skipped before any network traffic. The shutdown token
//! is polled at the start of each site and each candidate; state is
//! flushed at the end of every site and again at the end of the run, so
//! cancellation never loses completed work.
use chrono::Utc;
use rand::seq::SliceRandom;

use crate::backend::Dispatcher;
use crate::config::Config;
use crate::crawl::{RateLimiter, SitemapCrawler};
use crate::retry::RetryCoordinator;
use crate::shutdown::ShutdownToken;
use crate::storage::{RunSummary, SiteStats, StateStore};
use crate::verify::{Verdict, Verifier};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: &Config,
    store: &mut StateStore,
    limiter: &RateLimiter,
    crawler: &SitemapCrawler,
    verifier: &Verifier,
    dispatcher: &mut Dispatcher,
    retry: &RetryCoordinator,
    mut sites: Vec<String>,
    shutdown: &ShutdownToken,
) -> RunSummary {
    retry
        .process_due(store, limiter, verifier, dispatcher, shutdown)
        .await;

    sites.shuffle(&mut rand::thread_rng());

    for site in &sites {
        if shutdown.is_triggered() {
            break;
        }
        tracing::info!(site = %site, "Processing site");

        let mut candidates = crawler
            .urls_for_site(store, site, config.force_refresh)
            .await;
        if candidates.is_empty() {
            continue;
        }
        candidates.truncate(config.scan_depth);
        candidates.shuffle(&mut rand::thread_rng());

        let mut stats = SiteStats {
            recipes_found: candidates.len() as u64,
            ..SiteStats::default()
        };
        let mut imported_count = 0usize;

        for candidate in &candidates {
            if shutdown.is_triggered() {
                break;
            }
            if imported_count >= config.target_per_site {
                break;
            }

            let url = candidate.url.as_str();
            if store.is_imported(url) || store.is_rejected(url) {
                continue;
            }

            limiter.wait_if_needed(url).await;

            match verifier.verify(url).await {
                Verdict::Recipe => {
                    if dispatcher.import(limiter, url).await {
                        store.mark_imported(url);
                        imported_count += 1;
                        stats.recipes_imported += 1;
                    } else {
                        stats.errors += 1;
                        store.upsert_retry(url, "import failed");
                        tracing::error!(url = %url, "Import failed, queued for retry");
                    }
                }
                Verdict::Rejected(reason) => {
                    tracing::debug!(url = %url, reason = %reason, "Skipping");
                    store.mark_rejected(url);
                    stats.recipes_rejected += 1;
                }
                Verdict::Unverifiable(reason) => {
                    tracing::debug!(url = %url, reason = %reason, "Not verifiable this run");
                    stats.errors += 1;
                }
            }
        }

        tracing::info!(
            site = %site,
            imported = stats.recipes_imported,
            rejected = stats.recipes_rejected,
            errors = stats.errors,
            "Site results"
        );
        stats.last_run = Some(Utc::now());
        store.record_site_stats(site, stats);

        if let Err(e) = store.flush() {
            tracing::warn!(error = %e, "End-of-site flush failed");
        }
    }

    let summary = store.summary();
    if let Err(e) = store.flush() {
        tracing::warn!(error = %e, "Final flush failed");
    }
    summary
}
