//! Sitemap discovery: locate a site's sitemap, resolve it recursively,
//! and yield a garbage-filtered candidate list.
//!
//! Resolution order for the sitemap location: the robots.txt `Sitemap:`
//! directive, then a fixed list of conventional paths probed with HEAD.
//! A site with no resolvable sitemap yields no candidates — that is a
//! normal outcome, not an error. Malformed or unfetchable sitemap
//! documents likewise degrade to an empty result for that branch only.
//!
//! Successful discovery is cached wholesale through the state store and
//! reused until expiry or an explicit force-refresh.
use futures::future::BoxFuture;
use futures::FutureExt;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::StatusCode;
use std::time::Duration;

use super::Candidate;
use crate::http::send_with_retry;
use crate::storage::StateStore;

const ROBOTS_TXT_TIMEOUT: Duration = Duration::from_secs(5);
const SITEMAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Index recursion floor; a sub-sitemap referenced deeper than this is
/// not expanded.
const MAX_SITEMAP_DEPTH: usize = 2;
/// Fan-out cap per index document.
const MAX_SUB_SITEMAPS: usize = 3;

/// Conventional sitemap locations, probed in order; first 200 wins.
const SITEMAP_CANDIDATES: &[&str] = &[
    "/sitemap_index.xml",
    "/sitemap.xml",
    "/wp-sitemap.xml",
    "/post-sitemap.xml",
    "/recipe-sitemap.xml",
];

/// Binary/image assets that can never be recipe pages.
const JUNK_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".pdf", ".zip"];

/// Administrative path segments that mark obvious non-content pages.
const JUNK_PATH_SEGMENTS: &[&str] = &[
    "/privacy-policy",
    "/contact",
    "/about",
    "/login",
    "/wp-content/",
    "/cdn-cgi/",
];

/// One parsed sitemap document.
enum SitemapDocument {
    /// An index: references other sitemap documents.
    Index(Vec<String>),
    /// A leaf: references pages.
    UrlSet(Vec<String>),
    /// Nothing usable.
    Empty,
}

pub struct SitemapCrawler {
    client: reqwest::Client,
}

impl SitemapCrawler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// All candidate page URLs for a site, from cache or a fresh crawl.
    pub async fn urls_for_site(
        &self,
        store: &mut StateStore,
        site: &str,
        force_refresh: bool,
    ) -> Vec<Candidate> {
        if !force_refresh {
            if let Some(cached) = store.get_cached_sitemap(site) {
                tracing::debug!(site = %site, urls = cached.urls.len(), "Using cached sitemap");
                return cached
                    .urls
                    .iter()
                    .map(|u| Candidate::new(u.as_str()))
                    .collect();
            }
        }

        let Some(sitemap_url) = self.find_sitemap(site).await else {
            tracing::info!(site = %site, "No sitemap found");
            return Vec::new();
        };

        let urls = self.fetch_sitemap_urls(&sitemap_url, 0).await;
        tracing::info!(site = %site, sitemap = %sitemap_url, urls = urls.len(), "Sitemap crawled");
        store.cache_sitemap(site, &sitemap_url, urls.clone());
        urls.into_iter().map(Candidate::new).collect()
    }

    /// Locate a site's sitemap: robots directive, then known paths.
    async fn find_sitemap(&self, base_url: &str) -> Option<String> {
        let robots_url = format!("{base_url}/robots.txt");
        match send_with_retry(|| self.client.get(&robots_url).timeout(ROBOTS_TXT_TIMEOUT)).await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                if let Ok(body) = resp.text().await {
                    if let Some(url) = sitemap_directive(&body) {
                        return Some(url);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(site = %base_url, error = %e, "robots.txt fetch failed"),
        }

        for path in SITEMAP_CANDIDATES {
            let candidate = format!("{base_url}{path}");
            match send_with_retry(|| self.client.head(&candidate).timeout(ROBOTS_TXT_TIMEOUT)).await
            {
                Ok(resp) if resp.status() == StatusCode::OK => return Some(candidate),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(url = %candidate, error = %e, "Sitemap candidate check failed")
                }
            }
        }

        None
    }

    /// Recursively resolve a sitemap document into page URLs.
    ///
    /// Index documents prefer sub-sitemaps whose URL mentions "post" or
    /// "recipe" (falling back to all of them) and expand at most
    /// [`MAX_SUB_SITEMAPS`] to bound fan-out. Leaf documents get the
    /// garbage filter applied.
    fn fetch_sitemap_urls<'a>(&'a self, url: &'a str, depth: usize) -> BoxFuture<'a, Vec<String>> {
        async move {
            if depth > MAX_SITEMAP_DEPTH {
                return Vec::new();
            }

            let resp = match send_with_retry(|| self.client.get(url).timeout(SITEMAP_TIMEOUT)).await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Sitemap fetch failed");
                    return Vec::new();
                }
            };
            if resp.status() != StatusCode::OK {
                return Vec::new();
            }
            let body = match resp.text().await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Sitemap body read failed");
                    return Vec::new();
                }
            };

            match parse_sitemap_document(&body) {
                SitemapDocument::Index(subs) => {
                    let preferred: Vec<&String> = subs
                        .iter()
                        .filter(|s| s.contains("post") || s.contains("recipe"))
                        .collect();
                    let targets = if preferred.is_empty() {
                        subs.iter().collect::<Vec<_>>()
                    } else {
                        preferred
                    };

                    let mut all_urls = Vec::new();
                    for sub in targets.into_iter().take(MAX_SUB_SITEMAPS) {
                        all_urls.extend(self.fetch_sitemap_urls(sub, depth + 1).await);
                    }
                    all_urls
                }
                SitemapDocument::UrlSet(urls) => garbage_filter(urls),
                SitemapDocument::Empty => Vec::new(),
            }
        }
        .boxed()
    }
}

/// First `Sitemap:` directive in a robots.txt body, if any.
fn sitemap_directive(robots: &str) -> Option<String> {
    for line in robots.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(idx) = lower.find("sitemap:") {
            let value = line[idx + "sitemap:".len()..].trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Classify a sitemap body as index or leaf and collect its `<loc>`s.
/// Any XML error drops the whole branch — one broken document must not
/// abort the site.
fn parse_sitemap_document(content: &str) -> SitemapDocument {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut saw_sitemap = false;
    let mut saw_url = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"sitemap" => saw_sitemap = true,
                b"url" => saw_url = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim();
                    if !text.is_empty() {
                        locs.push(text.to_string());
                    }
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Sitemap parse error, dropping document");
                return SitemapDocument::Empty;
            }
            _ => {}
        }
        buf.clear();
    }

    if saw_sitemap {
        SitemapDocument::Index(locs)
    } else if saw_url {
        SitemapDocument::UrlSet(locs)
    } else {
        SitemapDocument::Empty
    }
}

/// Drop binary assets and administrative pages from a raw URL list.
fn garbage_filter(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .filter(|u| {
            let lower = u.to_lowercase();
            if JUNK_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                return false;
            }
            if JUNK_PATH_SEGMENTS.iter().any(|seg| lower.contains(seg)) {
                return false;
            }
            true
        })
        .collect()
}
