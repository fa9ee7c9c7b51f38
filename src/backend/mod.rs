//! Import dispatch to the configured recipe-management backends.
//!
//! Backends are independent and additive: a failure on one never blocks
//! the other, and an import counts as successful when at least one
//! backend accepted it. A 409 conflict is success too — the recipe
//! already exists, which is the end state we wanted. In dry-run mode no
//! network call is made at all and every import reports success, so the
//! rest of the pipeline can be exercised end to end.
mod mealie;
mod tandoor;

pub use mealie::{EndpointState, MealieBackend, MealieEndpoint, MealieRecipe};
pub use tandoor::{TandoorBackend, TandoorRecipe};

use thiserror::Error;

use crate::config::Config;
use crate::crawl::RateLimiter;
use crate::storage::StateStore;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid credentials — fatal at startup, pointless mid-run.
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    #[error("HTTP {0}")]
    Status(u16),

    /// Every known endpoint shape was tried and none answered.
    #[error("all endpoint candidates failed: {0}")]
    AllEndpointsFailed(String),
}

/// How a backend resolved an import submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    /// The backend already had it (HTTP 409).
    Duplicate,
}

pub struct Dispatcher {
    mealie: Option<MealieBackend>,
    tandoor: Option<TandoorBackend>,
    dry_run: bool,
}

impl Dispatcher {
    pub fn from_config(client: &reqwest::Client, config: &Config) -> Self {
        Self {
            mealie: config
                .mealie
                .enabled
                .then(|| MealieBackend::new(client.clone(), &config.mealie)),
            tandoor: config
                .tandoor
                .enabled
                .then(|| TandoorBackend::new(client.clone(), &config.tandoor)),
            dry_run: config.dry_run,
        }
    }

    pub fn mealie(&self) -> Option<&MealieBackend> {
        self.mealie.as_ref()
    }

    pub fn tandoor(&self) -> Option<&TandoorBackend> {
        self.tandoor.as_ref()
    }

    /// Submit a verified URL to every enabled backend.
    ///
    /// Returns true iff at least one backend accepted it (or dry-run is
    /// on, in which case nothing is sent and success is assumed).
    pub async fn import(&mut self, limiter: &RateLimiter, url: &str) -> bool {
        if self.dry_run {
            if self.mealie.is_some() {
                tracing::info!(url = %url, "[dry run] Would import to Mealie");
            }
            if self.tandoor.is_some() {
                tracing::info!(url = %url, "[dry run] Would import to Tandoor");
            }
            return true;
        }

        let mut success = false;

        if let Some(mealie) = &mut self.mealie {
            limiter.wait_if_needed(mealie.base_url()).await;
            match mealie.import_url(url).await {
                Ok(ImportOutcome::Created) => {
                    tracing::info!(url = %url, "[Mealie] Imported");
                    success = true;
                }
                Ok(ImportOutcome::Duplicate) => {
                    tracing::info!(url = %url, "[Mealie] Duplicate, already present");
                    success = true;
                }
                Err(e) => tracing::error!(url = %url, error = %e, "[Mealie] Import failed"),
            }
        }

        if let Some(tandoor) = &self.tandoor {
            limiter.wait_if_needed(tandoor.base_url()).await;
            match tandoor.import_url(url).await {
                Ok(ImportOutcome::Created) => {
                    tracing::info!(url = %url, "[Tandoor] Imported");
                    success = true;
                }
                Ok(ImportOutcome::Duplicate) => {
                    tracing::info!(url = %url, "[Tandoor] Duplicate, already present");
                    success = true;
                }
                Err(e) => tracing::error!(url = %url, error = %e, "[Tandoor] Import failed"),
            }
        }

        success
    }

    /// Verify API connectivity before any crawling begins.
    ///
    /// Bad credentials or an unreachable configured backend abort the
    /// run — proceeding would silently waste all discovery work. A
    /// backend without a configured token is skipped (a warning was
    /// already emitted by config validation).
    pub async fn check_connectivity(&self) -> Result<(), BackendError> {
        if let Some(mealie) = &self.mealie {
            if mealie.credentialed() {
                mealie.check_connectivity().await?;
            }
        }
        if let Some(tandoor) = &self.tandoor {
            if tandoor.credentialed() {
                tandoor.check_connectivity().await?;
            }
        }
        Ok(())
    }

    /// Merge the Mealie library's source URLs into the imported set so
    /// recipes that are already present are never re-submitted.
    pub async fn sync_library(&self, store: &mut StateStore) {
        let Some(mealie) = &self.mealie else {
            return;
        };
        if !mealie.credentialed() {
            return;
        }

        let urls = mealie.library_source_urls().await;
        if !urls.is_empty() {
            let added = store.merge_imported(urls);
            tracing::info!(synced = added, "Synced existing library URLs");
        }
    }
}
