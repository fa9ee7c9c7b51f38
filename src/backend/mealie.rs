//! Mealie API client.
//!
//! Mealie renamed its import-by-URL endpoint across major versions, so
//! the client carries an explicit endpoint state: `Unknown` until a
//! request gets a real answer, then `Confirmed` with the shape that
//! worked. While unknown, candidates are tried newest-first and a
//! 404/405 means "wrong shape, try the next one", not failure.
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::{BackendError, ImportOutcome};
use crate::audit::Instructions;
use crate::config::BackendConfig;
use crate::http::send_with_retry;

const IMPORT_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SYNC_PAGE_SIZE: usize = 100;
const AUDIT_PAGE_SIZE: usize = 1000;
const DELETE_ATTEMPTS: u32 = 3;

/// Import endpoints across Mealie versions, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MealieEndpoint {
    /// v2/v3 shape.
    CreateUrl,
    /// v1 shape.
    LegacyCreateUrl,
}

impl MealieEndpoint {
    const PREFERENCE: [MealieEndpoint; 2] = [MealieEndpoint::CreateUrl, MealieEndpoint::LegacyCreateUrl];

    pub fn path(self) -> &'static str {
        match self {
            MealieEndpoint::CreateUrl => "/api/recipes/create/url",
            MealieEndpoint::LegacyCreateUrl => "/api/recipes/create-url",
        }
    }
}

/// Which API shape this Mealie instance accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndpointState {
    #[default]
    Unknown,
    Confirmed(MealieEndpoint),
}

/// One library entry, as returned by the paginated recipes listing.
#[derive(Debug, Clone, Deserialize)]
pub struct MealieRecipe {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "orgURL", default)]
    pub org_url: Option<String>,
    #[serde(rename = "originalURL", default)]
    pub original_url: Option<String>,
}

impl MealieRecipe {
    /// The URL this recipe was imported from, under either field name
    /// Mealie has used for it.
    pub fn source_url(&self) -> Option<&str> {
        self.org_url.as_deref().or(self.original_url.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct RecipePage {
    #[serde(default)]
    items: Vec<MealieRecipe>,
}

#[derive(Debug, Deserialize)]
struct RecipeDetail {
    #[serde(rename = "recipeInstructions", default)]
    recipe_instructions: Option<Instructions>,
}

pub struct MealieBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    endpoint: EndpointState,
}

impl MealieBackend {
    pub fn new(client: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.api_token.clone().map(SecretString::from),
            endpoint: EndpointState::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentialed(&self) -> bool {
        self.token.is_some()
    }

    pub fn endpoint_state(&self) -> EndpointState {
        self.endpoint
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token.expose_secret()),
            None => rb,
        }
    }

    /// Submit a URL for import, probing endpoint shapes as needed.
    pub async fn import_url(&mut self, url: &str) -> Result<ImportOutcome, BackendError> {
        let candidates: Vec<MealieEndpoint> = match self.endpoint {
            EndpointState::Confirmed(endpoint) => vec![endpoint],
            EndpointState::Unknown => MealieEndpoint::PREFERENCE.to_vec(),
        };

        let mut last_error = "no endpoint candidates".to_string();
        let body = serde_json::json!({ "url": url });

        for endpoint in candidates {
            let full_url = format!("{}{}", self.base_url, endpoint.path());
            let resp = match send_with_retry(|| {
                self.authorize(self.client.post(&full_url))
                    .timeout(IMPORT_TIMEOUT)
                    .json(&body)
            })
            .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = resp.status().as_u16();

            // 404/405 means this shape is wrong or deprecated; try the next.
            if matches!(status, 404 | 405) {
                last_error = format!("HTTP {} on {}", status, endpoint.path());
                continue;
            }

            // A real answer: remember which shape this instance speaks.
            if self.endpoint == EndpointState::Unknown {
                self.endpoint = EndpointState::Confirmed(endpoint);
                tracing::debug!(endpoint = endpoint.path(), "Auto-detected Mealie API shape");
            }

            return match status {
                200..=299 => Ok(ImportOutcome::Created),
                409 => Ok(ImportOutcome::Duplicate),
                code => Err(BackendError::Status(code)),
            };
        }

        Err(BackendError::AllEndpointsFailed(last_error))
    }

    /// Preflight probe: one-item library page.
    pub async fn check_connectivity(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/recipes?page=1&perPage=1", self.base_url);
        let resp =
            send_with_retry(|| self.authorize(self.client.get(&url)).timeout(PROBE_TIMEOUT))
                .await?;

        match resp.status().as_u16() {
            200 => {
                tracing::info!(url = %self.base_url, "Mealie connectivity OK");
                Ok(())
            }
            401 => Err(BackendError::Auth(401)),
            code => {
                tracing::warn!(status = code, "Mealie returned unexpected status, proceeding anyway");
                Ok(())
            }
        }
    }

    /// All source URLs in the library, for startup sync. Pagination
    /// stops at the first empty page; any error stops the walk with a
    /// warning and returns what was gathered so far.
    pub async fn library_source_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        self.walk_library(SYNC_PAGE_SIZE, |recipe| {
            if let Some(url) = recipe.source_url() {
                if url.starts_with("http") {
                    urls.push(url.to_string());
                }
            }
        })
        .await;
        urls
    }

    /// Every library entry, for the audit job.
    pub async fn list_recipes(&self) -> Vec<MealieRecipe> {
        let mut recipes = Vec::new();
        self.walk_library(AUDIT_PAGE_SIZE, |recipe| recipes.push(recipe.clone()))
            .await;
        recipes
    }

    async fn walk_library(&self, per_page: usize, mut visit: impl FnMut(&MealieRecipe)) {
        let mut page = 1;
        loop {
            let url = format!(
                "{}/api/recipes?page={}&perPage={}",
                self.base_url, page, per_page
            );
            let resp = match send_with_retry(|| {
                self.authorize(self.client.get(&url)).timeout(IMPORT_TIMEOUT)
            })
            .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(page, error = %e, "Library walk stopped");
                    break;
                }
            };
            if resp.status() != reqwest::StatusCode::OK {
                break;
            }
            let parsed: RecipePage = match resp.json().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(page, error = %e, "Unexpected library payload, stopping walk");
                    break;
                }
            };
            if parsed.items.is_empty() {
                break;
            }
            for recipe in &parsed.items {
                visit(recipe);
            }
            page += 1;
        }
    }

    /// Instructions of one recipe, for integrity checking.
    pub async fn recipe_instructions(
        &self,
        slug: &str,
    ) -> Result<Option<Instructions>, BackendError> {
        let url = format!("{}/api/recipes/{}", self.base_url, slug);
        let resp =
            send_with_retry(|| self.authorize(self.client.get(&url)).timeout(IMPORT_TIMEOUT))
                .await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(BackendError::Status(resp.status().as_u16()));
        }
        let detail: RecipeDetail = resp
            .json()
            .await
            .map_err(BackendError::Network)?;
        Ok(detail.recipe_instructions)
    }

    /// Delete a recipe, retrying a few times because Mealie's SQLite
    /// storage intermittently locks under concurrent access.
    pub async fn delete_recipe(&self, slug: &str) -> Result<(), BackendError> {
        let url = format!("{}/api/recipes/{}", self.base_url, slug);
        let mut last_error = BackendError::AllEndpointsFailed("delete never attempted".to_string());

        for attempt in 0..DELETE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            match self
                .authorize(self.client.delete(&url))
                .timeout(PROBE_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => last_error = BackendError::Status(resp.status().as_u16()),
                Err(e) => last_error = BackendError::Network(e),
            }
        }

        Err(last_error)
    }
}
