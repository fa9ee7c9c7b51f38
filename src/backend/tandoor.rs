//! Tandoor API client. One stable import endpoint, DRF-style
//! cursorless pagination with a `next` link.
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::{BackendError, ImportOutcome};
use crate::audit::Instructions;
use crate::config::BackendConfig;
use crate::http::send_with_retry;

const IMPORT_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const AUDIT_PAGE_SIZE: usize = 100;

/// One library entry, as returned by the paginated recipe listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TandoorRecipe {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub steps: Option<Instructions>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecipePage {
    #[serde(default)]
    results: Vec<TandoorRecipe>,
    #[serde(default)]
    next: Option<String>,
}

pub struct TandoorBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl TandoorBackend {
    pub fn new(client: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.api_token.clone().map(SecretString::from),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentialed(&self) -> bool {
        self.token.is_some()
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token.expose_secret()),
            None => rb,
        }
    }

    /// Submit a URL for import.
    pub async fn import_url(&self, url: &str) -> Result<ImportOutcome, BackendError> {
        let full_url = format!("{}/api/recipe/import-url/", self.base_url);
        let body = serde_json::json!({ "url": url });

        let resp = send_with_retry(|| {
            self.authorize(self.client.post(&full_url))
                .timeout(IMPORT_TIMEOUT)
                .json(&body)
        })
        .await?;

        match resp.status().as_u16() {
            200..=299 => Ok(ImportOutcome::Created),
            409 => Ok(ImportOutcome::Duplicate),
            code => Err(BackendError::Status(code)),
        }
    }

    /// Preflight probe: one-item recipe page.
    pub async fn check_connectivity(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/recipe/?page=1&limit=1", self.base_url);
        let resp =
            send_with_retry(|| self.authorize(self.client.get(&url)).timeout(PROBE_TIMEOUT))
                .await?;

        match resp.status().as_u16() {
            200 => {
                tracing::info!(url = %self.base_url, "Tandoor connectivity OK");
                Ok(())
            }
            code @ (401 | 403) => Err(BackendError::Auth(code)),
            code => {
                tracing::warn!(status = code, "Tandoor returned unexpected status, proceeding anyway");
                Ok(())
            }
        }
    }

    /// Every library entry, for the audit job. Stops when the listing
    /// reports no further page; errors stop the walk with what was
    /// gathered so far.
    pub async fn list_recipes(&self) -> Vec<TandoorRecipe> {
        let mut recipes = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/api/recipe/?page={}&limit={}",
                self.base_url, page, AUDIT_PAGE_SIZE
            );
            let resp = match send_with_retry(|| {
                self.authorize(self.client.get(&url)).timeout(IMPORT_TIMEOUT)
            })
            .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(page, error = %e, "Tandoor library walk stopped");
                    break;
                }
            };
            if resp.status() != reqwest::StatusCode::OK {
                break;
            }
            let parsed: RecipePage = match resp.json().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(page, error = %e, "Unexpected Tandoor payload, stopping walk");
                    break;
                }
            };
            if parsed.results.is_empty() {
                break;
            }
            recipes.extend(parsed.results);
            if parsed.next.is_none() {
                break;
            }
            page += 1;
        }
        recipes
    }

    pub async fn delete_recipe(&self, id: i64) -> Result<(), BackendError> {
        let url = format!("{}/api/recipe/{}/", self.base_url, id);
        let resp = self
            .authorize(self.client.delete(&url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Status(resp.status().as_u16()))
        }
    }
}
