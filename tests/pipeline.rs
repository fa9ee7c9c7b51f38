//! End-to-end pipeline tests against mock sites and a mock backend.
//!
//! Each test stands up a wiremock "site" (robots.txt, sitemap, pages)
//! and, where needed, a wiremock Mealie, then drives the real pipeline
//! over them with a throwaway state directory.
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dredger::backend::Dispatcher;
use dredger::config::{BackendConfig, Config};
use dredger::crawl::{RateLimiter, SitemapCrawler};
use dredger::http::build_client;
use dredger::pipeline;
use dredger::retry::RetryCoordinator;
use dredger::shutdown::ShutdownToken;
use dredger::storage::StateStore;
use dredger::verify::Verifier;

const RECIPE_PAGE: &str = r#"<html><head><title>Garlic Butter Shrimp</title>
<script type="application/ld+json">{"@type":"Recipe","name":"Garlic Butter Shrimp"}</script>
</head><body><p>Melt the butter, add the garlic, toss the shrimp.</p></body></html>"#;

const PLAIN_PAGE: &str = r#"<html><head><title>Our Story</title></head>
<body><p>We started this blog in 2012.</p></body></html>"#;

/// Mount a site whose sitemap lists the given page paths.
async fn mount_site(server: &MockServer, pages: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    let entries: String = pages
        .iter()
        .map(|(p, _)| format!("<url><loc>{}{}</loc></url>", server.uri(), p))
        .collect();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<?xml version=\"1.0\"?><urlset>{entries}</urlset>"
        )))
        .mount(server)
        .await;
}

struct Harness {
    config: Config,
    limiter: RateLimiter,
    crawler: SitemapCrawler,
    verifier: Verifier,
    dispatcher: Dispatcher,
    retry: RetryCoordinator,
    token: ShutdownToken,
}

fn harness(mealie_url: Option<&str>) -> Harness {
    let client = build_client().unwrap();
    let mut config = Config::default();
    config.crawl_delay_secs = 0.0;
    config.respect_robots_txt = false;
    match mealie_url {
        Some(url) => {
            config.dry_run = false;
            config.mealie = BackendConfig {
                enabled: true,
                url: url.to_string(),
                api_token: Some("token".to_string()),
            };
        }
        None => {
            config.dry_run = true;
        }
    }

    Harness {
        limiter: RateLimiter::new(client.clone(), 0.0, false),
        crawler: SitemapCrawler::new(client.clone()),
        verifier: Verifier::new(client.clone(), None),
        dispatcher: Dispatcher::from_config(&client, &config),
        retry: RetryCoordinator::new(),
        token: ShutdownToken::new(),
        config,
    }
}

async fn run_once(h: &mut Harness, store: &mut StateStore, site: &str) {
    pipeline::run(
        &h.config,
        store,
        &h.limiter,
        &h.crawler,
        &h.verifier,
        &mut h.dispatcher,
        &h.retry,
        vec![site.to_string()],
        &h.token,
    )
    .await;
}

#[tokio::test]
async fn pipeline_imports_recipes_and_rejects_junk() {
    let site = MockServer::start().await;
    mount_site(
        &site,
        &[("/garlic-butter-shrimp", RECIPE_PAGE), ("/our-story", PLAIN_PAGE)],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/garlic-butter-shrimp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/our-story"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAIN_PAGE))
        .mount(&site)
        .await;

    let mealie = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/recipes/create/url"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mealie)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path(), 7).unwrap();
    let mut h = harness(Some(&mealie.uri()));

    run_once(&mut h, &mut store, &site.uri()).await;

    let shrimp = format!("{}/garlic-butter-shrimp", site.uri());
    let story = format!("{}/our-story", site.uri());
    assert!(store.is_imported(&shrimp));
    assert!(store.is_rejected(&story));

    // Terminal outcomes are on disk without an explicit flush call.
    let reloaded = StateStore::open(dir.path(), 7).unwrap();
    assert!(reloaded.is_imported(&shrimp));
    assert!(reloaded.is_rejected(&story));
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let site = MockServer::start().await;
    mount_site(
        &site,
        &[("/garlic-butter-shrimp", RECIPE_PAGE), ("/our-story", PLAIN_PAGE)],
    )
    .await;
    // Each page is fetched exactly once across BOTH runs: the second
    // run sees the URLs in the imported/rejected sets and skips them.
    Mock::given(method("GET"))
        .and(path("/garlic-butter-shrimp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
        .expect(1)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/our-story"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PLAIN_PAGE))
        .expect(1)
        .mount(&site)
        .await;

    let mealie = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/recipes/create/url"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1) // no URL is ever imported twice
        .mount(&mealie)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path(), 7).unwrap();
    let mut h = harness(Some(&mealie.uri()));

    run_once(&mut h, &mut store, &site.uri()).await;
    run_once(&mut h, &mut store, &site.uri()).await;

    let summary = store.summary();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.rejected, 1);
}

#[tokio::test]
async fn dry_run_never_posts_but_still_discovers_and_verifies() {
    let site = MockServer::start().await;
    mount_site(&site, &[("/garlic-butter-shrimp", RECIPE_PAGE)]).await;
    Mock::given(method("GET"))
        .and(path("/garlic-butter-shrimp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
        .expect(1) // verification still runs in full
        .mount(&site)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path(), 7).unwrap();
    let mut h = harness(None); // dry run, no backend configured

    run_once(&mut h, &mut store, &site.uri()).await;

    // Discovery populated the cache and the candidate was classified.
    assert!(store.get_cached_sitemap(&site.uri()).is_some());
    assert!(store.is_imported(&format!("{}/garlic-butter-shrimp", site.uri())));
}

#[tokio::test]
async fn per_site_target_caps_imports() {
    let site = MockServer::start().await;
    mount_site(
        &site,
        &[("/dish-one", RECIPE_PAGE), ("/dish-two", RECIPE_PAGE)],
    )
    .await;
    for p in ["/dish-one", "/dish-two"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
            .mount(&site)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path(), 7).unwrap();
    let mut h = harness(None);
    h.config.target_per_site = 1;

    run_once(&mut h, &mut store, &site.uri()).await;

    assert_eq!(store.summary().imported, 1);
}

#[tokio::test]
async fn scan_depth_bounds_candidates() {
    let site = MockServer::start().await;
    mount_site(
        &site,
        &[("/dish-one", RECIPE_PAGE), ("/dish-two", RECIPE_PAGE)],
    )
    .await;
    for p in ["/dish-one", "/dish-two"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECIPE_PAGE))
            .mount(&site)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path(), 7).unwrap();
    let mut h = harness(None);
    h.config.scan_depth = 1;

    run_once(&mut h, &mut store, &site.uri()).await;

    // Only one candidate was even considered.
    assert_eq!(store.summary().imported, 1);
}

#[tokio::test]
async fn triggered_shutdown_does_no_work() {
    let site = MockServer::start().await;
    // Any request at all would be a failure.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&site)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&site)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open(dir.path(), 7).unwrap();
    let mut h = harness(None);
    h.token.trigger();

    run_once(&mut h, &mut store, &site.uri()).await;

    assert_eq!(store.summary().imported, 0);
}
