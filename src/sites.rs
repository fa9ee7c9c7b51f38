//! Site list loading.
//!
//! Priority: an explicitly named file (fatal if missing or invalid,
//! because the user asked for it) → a `sites.json` next to the binary
//! (lenient, warning on failure) → the configured list → the built-in
//! fallback of ten major recipe sites.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Fallback list when nothing else is configured.
pub const DEFAULT_SITES: &[&str] = &[
    "https://www.seriouseats.com",
    "https://www.bonappetit.com",
    "https://www.recipetineats.com",
    "https://smittenkitchen.com",
    "https://minimalistbaker.com",
    "https://www.justonecookbook.com",
    "https://www.woksoflife.com",
    "https://sallysbakingaddiction.com",
    "https://www.skinnytaste.com",
    "https://www.budgetbytes.com",
];

#[derive(Debug, Error)]
pub enum SitesError {
    #[error("Sites file not found: {0}")]
    NotFound(String),

    #[error("Failed to read sites file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid sites file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A sites file is either a bare array of URLs or `{"sites": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SitesFile {
    List(Vec<String>),
    Object { sites: Vec<String> },
}

fn parse_sites_json(content: &str) -> Result<Vec<String>, serde_json::Error> {
    let parsed: SitesFile = serde_json::from_str(content)?;
    let sites = match parsed {
        SitesFile::List(sites) | SitesFile::Object { sites } => sites,
    };
    Ok(sites.into_iter().filter(|s| s.starts_with("http")).collect())
}

/// Load the site list using the standard `sites.json` location.
pub fn load_sites(cli_path: Option<&Path>, configured: &[String]) -> Result<Vec<String>, SitesError> {
    load_sites_from(cli_path, Path::new("sites.json"), configured)
}

fn load_sites_from(
    cli_path: Option<&Path>,
    local_path: &Path,
    configured: &[String],
) -> Result<Vec<String>, SitesError> {
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(SitesError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        return Ok(parse_sites_json(&content)?);
    }

    if local_path.exists() {
        match std::fs::read_to_string(local_path) {
            Ok(content) => match parse_sites_json(&content) {
                Ok(sites) if !sites.is_empty() => return Ok(sites),
                Ok(_) => tracing::warn!(path = %local_path.display(), "Sites file contains no usable URLs"),
                Err(e) => tracing::warn!(path = %local_path.display(), error = %e, "Failed to parse sites file"),
            },
            Err(e) => tracing::warn!(path = %local_path.display(), error = %e, "Failed to read sites file"),
        }
    }

    if !configured.is_empty() {
        return Ok(configured
            .iter()
            .filter(|s| s.starts_with("http"))
            .cloned()
            .collect());
    }

    Ok(DEFAULT_SITES.iter().map(|s| s.to_string()).collect())
}
