//! Content verification: fetch a candidate page and decide whether it
//! is a single recipe worth importing.
//!
//! Classification order, cheapest first: the raw body is scanned for a
//! structured-data `"@type": "Recipe"` marker before any HTML parsing;
//! only if that misses is the document parsed and probed for known
//! recipe-plugin class signatures. Pages that pass either check still
//! go through the paranoid filters — listicle slugs, bad keywords,
//! listicle titles — and the optional language filter, because plenty
//! of roundup pages embed a Recipe schema for a dish they link to.
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;
use whatlang::Lang;

use crate::http::send_with_retry;

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Class-attribute signatures of the common recipe plugins.
const KNOWN_RECIPE_CLASSES: &[&str] = &[
    "wp-recipe-maker",
    "tasty-recipes",
    "mv-create-card",
    "recipe-card",
];

/// Slug substrings that mark non-recipe content even when a recipe
/// schema is present.
const BAD_KEYWORDS: &[&str] = &[
    "roundup",
    "collection",
    "guide",
    "review",
    "giveaway",
    "shop",
    "store",
    "product",
];

/// How much visible text feeds language detection, and how little makes
/// the signal too weak to act on.
const LANGUAGE_SAMPLE_CHARS: usize = 1000;
const LANGUAGE_MIN_CHARS: usize = 50;

fn listicle_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)-(best|top|must|favorite|easy|healthy|quick|ways|things)")
            .expect("listicle pattern is a valid regex")
    })
}

/// Outcome of verifying one candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The page is a single recipe; hand it to the dispatcher.
    Recipe,
    /// Terminal classification rejection — recorded in the rejected
    /// set and never revisited.
    Rejected(String),
    /// The page could not be fetched after the retry layer gave up.
    /// Counted as a site error and left unpersisted so the URL is
    /// naturally revisited on a later run.
    Unverifiable(String),
}

pub struct Verifier {
    client: reqwest::Client,
    language_filter: Option<Lang>,
}

impl Verifier {
    pub fn new(client: reqwest::Client, language_filter: Option<Lang>) -> Self {
        Self {
            client,
            language_filter,
        }
    }

    /// Fetch and classify one candidate page.
    pub async fn verify(&self, url: &str) -> Verdict {
        let resp = match send_with_retry(|| self.client.get(url).timeout(PAGE_TIMEOUT)).await {
            Ok(r) => r,
            Err(e) => return Verdict::Unverifiable(format!("fetch failed: {e}")),
        };
        if resp.status() != StatusCode::OK {
            return Verdict::Rejected(format!("HTTP {}", resp.status().as_u16()));
        }
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return Verdict::Unverifiable(format!("body read failed: {e}")),
        };
        classify(url, &body, self.language_filter)
    }
}

/// Pure classification of an already-fetched page body.
fn classify(url: &str, body: &str, language_filter: Option<Lang>) -> Verdict {
    let mut doc = None;
    let mut is_recipe =
        body.contains(r#""@type":"Recipe""#) || body.contains(r#""@type": "Recipe""#);

    if !is_recipe {
        let parsed = Html::parse_document(body);
        is_recipe = has_recipe_class(&parsed);
        doc = Some(parsed);
    }
    if !is_recipe {
        return Verdict::Rejected("no recipe detected".to_string());
    }

    let doc = doc.unwrap_or_else(|| Html::parse_document(body));

    if let Some(reason) = paranoid_reject(url, page_title(&doc).as_deref()) {
        return Verdict::Rejected(reason);
    }

    if let Some(want) = language_filter {
        if let Some(reason) = language_reject(&doc, want) {
            return Verdict::Rejected(reason);
        }
    }

    Verdict::Recipe
}

/// Does any element carry one of the known recipe-plugin classes?
fn has_recipe_class(doc: &Html) -> bool {
    KNOWN_RECIPE_CLASSES.iter().any(|cls| {
        Selector::parse(&format!("[class*=\"{cls}\"]"))
            .map(|sel| doc.select(&sel).next().is_some())
            .unwrap_or(false)
    })
}

fn page_title(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>())
}

/// Secondary rejection rules applied even after structural detection
/// succeeds. Returns the rejection reason, or `None` to accept.
fn paranoid_reject(url: &str, title: Option<&str>) -> Option<String> {
    let slug = slug_of(url);

    if listicle_regex().is_match(&slug) {
        return Some(format!("listicle detected: {slug}"));
    }
    for kw in BAD_KEYWORDS {
        if slug.contains(kw) {
            return Some(format!("bad keyword: {kw}"));
        }
    }
    if let Some(title) = title {
        let title = title.to_lowercase();
        if title.contains("best recipes") || title.contains("top 10") {
            return Some("listicle title".to_string());
        }
    }
    None
}

/// Last path segment of a URL, lowercased. Shared with the audit job,
/// which applies its own filters to the same slugs.
pub(crate) fn slug_of(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    path.trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Detect the page language from a bounded visible-text sample.
/// Too little text is no signal at all, so the check is skipped rather
/// than failed. whatlang is deterministic, so repeated runs agree.
fn language_reject(doc: &Html, want: Lang) -> Option<String> {
    let text = doc
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let sample: String = text.chars().take(LANGUAGE_SAMPLE_CHARS).collect();

    if sample.chars().count() <= LANGUAGE_MIN_CHARS {
        return None;
    }

    match whatlang::detect_lang(&sample) {
        Some(got) if got != want => Some(format!(
            "language mismatch: detected '{}', want '{}'",
            got.code(),
            want.code()
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RECIPE_JSONLD: &str = r#"<html><head><title>Garlic Butter Shrimp</title>
<script type="application/ld+json">{"@context":"https://schema.org","@type":"Recipe","name":"Garlic Butter Shrimp"}</script>
</head><body><p>Melt the butter, add the garlic, toss the shrimp.</p></body></html>"#;

    const RECIPE_PLUGIN: &str = r#"<html><head><title>One Pan Chicken</title></head>
<body><div class="wprm-container wp-recipe-maker">Ingredients and steps here.</div></body></html>"#;

    const PLAIN_PAGE: &str = r#"<html><head><title>Our Story</title></head>
<body><p>We started this blog in 2012.</p></body></html>"#;

    // --- Slug and paranoid filters ---

    #[test]
    fn test_slug_of() {
        assert_eq!(
            slug_of("https://a.example/recipes/Garlic-Butter-Shrimp/"),
            "garlic-butter-shrimp"
        );
        assert_eq!(slug_of("https://a.example/"), "");
        assert_eq!(slug_of("not a url"), "");
    }

    #[test]
    fn test_listicle_slug_rejected() {
        let reason =
            paranoid_reject("https://a.example/10-best-soups-for-winter", None).unwrap();
        assert!(reason.starts_with("listicle detected"));
    }

    #[test]
    fn test_five_easy_ways_rejected() {
        assert!(paranoid_reject("https://a.example/5-easy-ways", None).is_some());
    }

    #[test]
    fn test_plain_recipe_slug_accepted() {
        assert!(paranoid_reject("https://a.example/garlic-butter-shrimp", None).is_none());
    }

    #[test]
    fn test_bad_keyword_rejected() {
        let reason =
            paranoid_reject("https://a.example/holiday-gift-guide", None).unwrap();
        assert_eq!(reason, "bad keyword: guide");
    }

    #[test]
    fn test_listicle_title_rejected() {
        let reason = paranoid_reject(
            "https://a.example/winter-soups",
            Some("Top 10 Soups | Example Blog"),
        )
        .unwrap();
        assert_eq!(reason, "listicle title");
    }

    // --- Pure classification ---

    #[test]
    fn test_jsonld_marker_classifies_as_recipe() {
        assert_eq!(
            classify("https://a.example/garlic-butter-shrimp", RECIPE_JSONLD, None),
            Verdict::Recipe
        );
    }

    #[test]
    fn test_plugin_class_classifies_as_recipe() {
        assert_eq!(
            classify("https://a.example/one-pan-chicken", RECIPE_PLUGIN, None),
            Verdict::Recipe
        );
    }

    #[test]
    fn test_plain_page_rejected() {
        assert_eq!(
            classify("https://a.example/our-story", PLAIN_PAGE, None),
            Verdict::Rejected("no recipe detected".to_string())
        );
    }

    #[test]
    fn test_recipe_schema_on_listicle_slug_still_rejected() {
        match classify("https://a.example/10-best-soups-for-winter", RECIPE_JSONLD, None) {
            Verdict::Rejected(reason) => assert!(reason.starts_with("listicle detected")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_language_mismatch_rejected() {
        let spanish = r#"<html><head><title>Tarta de Manzana</title></head><body>
<script type="application/ld+json">{"@type":"Recipe"}</script>
<p>Esta tarta de manzana es la receta favorita de mi abuela. Pelamos las manzanas,
preparamos la masa con harina y mantequilla, y horneamos durante cuarenta minutos
hasta que la superficie quede dorada. Se sirve templada con un poco de nata.</p>
</body></html>"#;
        match classify("https://a.example/tarta-de-manzana", spanish, Some(Lang::Eng)) {
            Verdict::Rejected(reason) => assert!(reason.starts_with("language mismatch")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_language_match_accepted() {
        let english = r#"<html><head><title>Apple Pie</title></head><body>
<script type="application/ld+json">{"@type":"Recipe"}</script>
<p>This apple pie is my grandmother's favorite recipe. Peel the apples, make the
pastry with flour and butter, and bake for forty minutes until golden. Serve it
warm with a little cream on the side for the full experience.</p>
</body></html>"#;
        assert_eq!(
            classify("https://a.example/apple-pie", english, Some(Lang::Eng)),
            Verdict::Recipe
        );
    }

    #[test]
    fn test_short_text_skips_language_check() {
        // Too few visible characters to trust detection: accepted.
        let tiny = r#"<html><body><script type="application/ld+json">{"@type":"Recipe"}</script><p>Pie.</p></body></html>"#;
        assert_eq!(
            classify("https://a.example/pie", tiny, Some(Lang::Eng)),
            Verdict::Recipe
        );
    }

    // --- Fetch behavior ---

    #[tokio::test]
    async fn test_verify_recipe_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garlic-butter-shrimp"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_JSONLD))
            .mount(&server)
            .await;

        let verifier = Verifier::new(crate::http::build_client().unwrap(), None);
        let verdict = verifier
            .verify(&format!("{}/garlic-butter-shrimp", server.uri()))
            .await;
        assert_eq!(verdict, Verdict::Recipe);
    }

    #[tokio::test]
    async fn test_non_200_is_rejected_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let verifier = Verifier::new(crate::http::build_client().unwrap(), None);
        let verdict = verifier.verify(&format!("{}/gone", server.uri())).await;
        assert_eq!(verdict, Verdict::Rejected("HTTP 410".to_string()));
    }

    #[tokio::test]
    async fn test_unfetchable_is_unverifiable_not_rejected() {
        let verifier = Verifier::new(crate::http::build_client().unwrap(), None);
        // Unsupported scheme fails immediately without retries.
        let verdict = verifier.verify("htp://nowhere.invalid/soup").await;
        assert!(matches!(verdict, Verdict::Unverifiable(_)));
    }
}
