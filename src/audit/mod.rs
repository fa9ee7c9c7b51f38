//! Offline library audit: scan the already-imported Mealie/Tandoor
//! libraries for junk and broken entries, deleting what should never
//! have been imported.
//!
//! Two phases. Phase 1 is a cheap synchronous filter over entry names
//! and source URLs. Phase 2 fetches instruction payloads and deletes
//! entries whose instructions are effectively empty; it runs on a
//! small bounded worker pool because the backend's storage layer is
//! intolerant of concurrent write contention.
//!
//! The audit shares the persisted rejected and verified sets with the
//! acquisition pipeline through the same state store, interleaving at
//! file-flush granularity.
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::backend::{Dispatcher, TandoorRecipe};
use crate::storage::StateStore;
use crate::verify::slug_of;

/// Name/slug fragments that mark an entry as non-recipe content
/// regardless of what its instructions look like.
const HIGH_RISK_KEYWORDS: &[&str] = &[
    "cleaning",
    "storing",
    "freezing",
    "pantry",
    "kitchen tools",
    "review",
    "giveaway",
    "shop",
    "store",
    "product",
    "gift",
    "unboxing",
    "news",
    "travel",
    "podcast",
    "interview",
    "night cream",
    "face mask",
    "skin care",
    "beauty",
    "diy",
    "weekly plan",
    "menu",
    "holiday guide",
    "foods to try",
    "things to eat",
    "detox water",
    "lose weight",
];

/// Path fragments of pages that are never recipes.
const GARBAGE_SEGMENTS: &[&str] = &["privacy-policy", "contact", "about-us", "login", "cart"];

/// Listicle titles lead with a count: "10 best ...", "5 easy ...".
fn audit_listicle_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+)\s+(best|top|must|favorite|easy|healthy|quick|ways|things)")
            .expect("listicle pattern is a valid regex")
    })
}

// ============================================================================
// Instruction payloads
// ============================================================================

/// Instruction payloads as the backends have historically shaped them:
/// a plain text blob, or a list of steps where each step is either bare
/// text or a structured object carrying a `text` field. Absence is
/// `Option::None` at the call site. Each variant has exactly one
/// validation rule; no runtime shape probing.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Instructions {
    PlainText(String),
    Steps(Vec<Step>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Text(String),
    Structured {
        #[serde(default)]
        text: String,
    },
}

impl Step {
    fn text(&self) -> &str {
        match self {
            Step::Text(t) => t,
            Step::Structured { text } => text,
        }
    }
}

impl Instructions {
    /// Whether the instructions actually say anything. A scraper
    /// apology ("could not detect ...") counts as empty.
    pub fn has_content(&self) -> bool {
        match self {
            Instructions::PlainText(text) => {
                let trimmed = text.trim();
                !trimmed.is_empty() && !trimmed.to_lowercase().contains("could not detect")
            }
            Instructions::Steps(steps) => steps.iter().any(|s| !s.text().trim().is_empty()),
        }
    }
}

// ============================================================================
// Junk detection
// ============================================================================

/// Phase-1 filter: does this library entry's name or source URL mark it
/// as junk? Entries without a source URL are never flagged here — there
/// is nothing to match against and phase 2 still integrity-checks them.
pub fn is_junk_content(name: &str, url: Option<&str>) -> bool {
    let Some(url) = url else {
        return false;
    };
    let slug = slug_of(url);
    let name_lower = name.to_lowercase();

    for kw in HIGH_RISK_KEYWORDS {
        if slug.contains(&kw.replace(' ', "-")) || name_lower.contains(kw) {
            return true;
        }
    }

    let re = audit_listicle_regex();
    if re.is_match(&slug) || re.is_match(&name_lower) {
        return true;
    }

    let url_lower = url.to_lowercase();
    GARBAGE_SEGMENTS.iter().any(|seg| url_lower.contains(seg))
}

/// Tandoor keeps instructions inline: steps when present, falling back
/// to the description when the step list is missing or empty.
fn tandoor_instructions(recipe: &TandoorRecipe) -> Option<Instructions> {
    match &recipe.steps {
        Some(Instructions::Steps(steps)) if !steps.is_empty() => return recipe.steps.clone(),
        Some(Instructions::PlainText(text)) if !text.trim().is_empty() => {
            return recipe.steps.clone()
        }
        _ => {}
    }
    recipe
        .description
        .as_ref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| Instructions::PlainText(d.clone()))
}

// ============================================================================
// Audit run
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct AuditReport {
    pub scanned: usize,
    pub junk_deleted: usize,
    pub broken_deleted: usize,
    pub verified: usize,
}

/// Run the full library audit.
///
/// In dry-run mode nothing is deleted and no state is persisted; the
/// report still says what a live run would have done.
pub async fn run_audit(
    dispatcher: &Dispatcher,
    store: &mut StateStore,
    workers: usize,
    dry_run: bool,
) -> AuditReport {
    let mut report = AuditReport::default();

    audit_mealie(dispatcher, store, workers, dry_run, &mut report).await;
    audit_tandoor(dispatcher, store, dry_run, &mut report).await;

    if !dry_run {
        if let Err(e) = store.flush() {
            tracing::warn!(error = %e, "Failed to persist audit state");
        }
    }

    tracing::info!(
        scanned = report.scanned,
        junk = report.junk_deleted,
        broken = report.broken_deleted,
        verified = report.verified,
        dry_run,
        "Audit complete"
    );
    report
}

async fn audit_mealie(
    dispatcher: &Dispatcher,
    store: &mut StateStore,
    workers: usize,
    dry_run: bool,
    report: &mut AuditReport,
) {
    let Some(mealie) = dispatcher.mealie() else {
        return;
    };
    if !mealie.credentialed() {
        return;
    }

    let recipes = mealie.list_recipes().await;
    report.scanned += recipes.len();
    tracing::info!(count = recipes.len(), "Scanning Mealie library");

    // Phase 1: name/URL junk filter.
    let mut clean = Vec::new();
    for recipe in recipes {
        let name = recipe.name.clone().unwrap_or_else(|| "Unknown".to_string());
        let Some(slug) = recipe.slug.clone() else {
            continue;
        };
        if is_junk_content(&name, recipe.source_url()) {
            report.junk_deleted += 1;
            if dry_run {
                tracing::info!(name = %name, "[dry run] Would delete junk entry from Mealie");
                continue;
            }
            tracing::info!(name = %name, "Deleting junk entry from Mealie");
            if let Err(e) = mealie.delete_recipe(&slug).await {
                tracing::warn!(slug = %slug, error = %e, "Mealie delete failed");
            }
            if let Some(url) = recipe.source_url() {
                store.unmark_imported(url);
                store.mark_rejected(url);
            }
            store.unmark_verified(&slug);
        } else {
            clean.push(recipe);
        }
    }

    // Phase 2: instruction integrity, skipping entries verified on a
    // previous pass, with bounded fan-out against the backend.
    let pending: Vec<(String, crate::backend::MealieRecipe)> = clean
        .into_iter()
        .filter_map(|r| {
            let slug = r.slug.clone()?;
            if store.is_verified(&slug) {
                return None;
            }
            Some((slug, r))
        })
        .collect();
    tracing::info!(count = pending.len(), workers, "Deep integrity scan");

    let checked: Vec<_> = stream::iter(pending)
        .map(|(slug, recipe)| async move {
            let instructions = mealie.recipe_instructions(&slug).await;
            (slug, recipe, instructions)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    for (slug, recipe, instructions) in checked {
        let name = recipe.name.clone().unwrap_or_else(|| "Unknown".to_string());
        match instructions {
            Ok(inst) => {
                if inst.as_ref().is_some_and(Instructions::has_content) {
                    report.verified += 1;
                    if !dry_run {
                        store.mark_verified(&slug);
                    }
                } else {
                    report.broken_deleted += 1;
                    if dry_run {
                        tracing::info!(name = %name, "[dry run] Would delete broken entry from Mealie");
                        continue;
                    }
                    tracing::info!(name = %name, "Deleting broken entry from Mealie");
                    if let Err(e) = mealie.delete_recipe(&slug).await {
                        tracing::warn!(slug = %slug, error = %e, "Mealie delete failed");
                    }
                    if let Some(url) = recipe.source_url() {
                        store.unmark_imported(url);
                        store.mark_rejected(url);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "Integrity check skipped");
            }
        }
    }
}

async fn audit_tandoor(
    dispatcher: &Dispatcher,
    store: &mut StateStore,
    dry_run: bool,
    report: &mut AuditReport,
) {
    let Some(tandoor) = dispatcher.tandoor() else {
        return;
    };
    if !tandoor.credentialed() {
        return;
    }

    let recipes = tandoor.list_recipes().await;
    report.scanned += recipes.len();
    tracing::info!(count = recipes.len(), "Scanning Tandoor library");

    for recipe in recipes {
        let name = recipe.name.clone().unwrap_or_else(|| "Unknown".to_string());
        let id = recipe.id.to_string();

        let junk = is_junk_content(&name, recipe.source.as_deref());
        let broken = !junk
            && !store.is_verified(&id)
            && !tandoor_instructions(&recipe)
                .as_ref()
                .is_some_and(Instructions::has_content);

        if junk || broken {
            if junk {
                report.junk_deleted += 1;
            } else {
                report.broken_deleted += 1;
            }
            if dry_run {
                tracing::info!(name = %name, "[dry run] Would delete entry from Tandoor");
                continue;
            }
            tracing::info!(name = %name, "Deleting entry from Tandoor");
            if let Err(e) = tandoor.delete_recipe(recipe.id).await {
                tracing::warn!(id = recipe.id, error = %e, "Tandoor delete failed");
            }
            if let Some(url) = &recipe.source {
                store.unmark_imported(url);
                store.mark_rejected(url);
            }
        } else if !store.is_verified(&id) {
            report.verified += 1;
            if !dry_run {
                store.mark_verified(&id);
            }
        }
    }
}
