use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dredger::backend::Dispatcher;
use dredger::config::Config;
use dredger::crawl::{RateLimiter, SitemapCrawler};
use dredger::retry::RetryCoordinator;
use dredger::shutdown::{self, ShutdownToken};
use dredger::storage::StateStore;
use dredger::verify::Verifier;
use dredger::{audit, http, notify, pipeline, sites};

#[derive(Parser, Debug)]
#[command(
    name = "dredger",
    version,
    about = "Sitemap-driven recipe harvester for Mealie and Tandoor"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "dredger.toml")]
    config: PathBuf,

    /// Scan and classify without importing
    #[arg(long)]
    dry_run: bool,

    /// Recipes to import per site
    #[arg(long)]
    limit: Option<usize>,

    /// URLs to scan per site
    #[arg(long)]
    depth: Option<usize>,

    /// Path to a JSON file containing site URLs
    #[arg(long)]
    sites: Option<PathBuf>,

    /// Force fresh crawls, ignoring the sitemap cache
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audit the imported library for junk and broken entries
    Audit {
        /// Worker pool size for integrity checks
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Config layering: file, then environment, then CLI flags.
    let mut config = Config::load(&args.config).context("Failed to load configuration")?;
    config.overlay_env();
    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(limit) = args.limit {
        config.target_per_site = limit;
    }
    if let Some(depth) = args.depth {
        config.scan_depth = depth;
    }
    if args.no_cache {
        config.force_refresh = true;
    }
    if let Some(Command::Audit {
        workers: Some(workers),
    }) = &args.command
    {
        config.audit_workers = *workers;
    }
    config.validate().context("Invalid configuration")?;

    let client = http::build_client().context("Failed to build HTTP client")?;
    let mut store = StateStore::open(&config.data_dir, config.cache_expiry_days)
        .context("Failed to open state store")?;
    let mut dispatcher = Dispatcher::from_config(&client, &config);

    // Bad credentials or an unreachable backend abort before any
    // crawling — proceeding would silently waste all discovery work.
    dispatcher
        .check_connectivity()
        .await
        .context("Backend connectivity check failed")?;

    match &args.command {
        Some(Command::Audit { .. }) => {
            let report =
                audit::run_audit(&dispatcher, &mut store, config.audit_workers, config.dry_run)
                    .await;
            println!(
                "Audit: {} scanned, {} junk deleted, {} broken deleted, {} verified{}",
                report.scanned,
                report.junk_deleted,
                report.broken_deleted,
                report.verified,
                if config.dry_run { " (dry run)" } else { "" }
            );
        }
        None => dredge(&args, config, client, &mut store, &mut dispatcher).await?,
    }

    Ok(())
}

async fn dredge(
    args: &Args,
    config: Config,
    client: reqwest::Client,
    store: &mut StateStore,
    dispatcher: &mut Dispatcher,
) -> Result<()> {
    let site_list = sites::load_sites(args.sites.as_deref(), &config.sites)
        .context("Failed to load site list")?;

    tracing::info!(
        mode = if config.dry_run { "DRY RUN" } else { "LIVE IMPORT" },
        sites = site_list.len(),
        limit = config.target_per_site,
        "Recipe dredger started"
    );

    let limiter = RateLimiter::new(
        client.clone(),
        config.crawl_delay_secs,
        config.respect_robots_txt,
    );
    let crawler = SitemapCrawler::new(client.clone());
    let language = config
        .language_filter
        .as_deref()
        .and_then(whatlang::Lang::from_code);
    let verifier = Verifier::new(client.clone(), language);
    let retry = RetryCoordinator::new();

    let token = ShutdownToken::new();
    shutdown::listen_for_signals(token.clone());

    // Merge what the backends already hold so known recipes are never
    // re-submitted.
    if config.sync_library && !config.dry_run {
        dispatcher.sync_library(store).await;
    }

    let summary = pipeline::run(
        &config,
        store,
        &limiter,
        &crawler,
        &verifier,
        dispatcher,
        &retry,
        site_list,
        &token,
    )
    .await;

    if token.is_triggered() {
        tracing::info!("Gracefully stopped by signal");
    } else {
        tracing::info!(
            imported = summary.imported,
            rejected = summary.rejected,
            retry_queue = summary.retry_queue,
            cached_sites = summary.cached_sites,
            "Session summary"
        );
    }

    if let Some(webhook) = &config.notification_webhook_url {
        notify::send_summary(&client, webhook, &summary).await;
    }

    tracing::info!("Dredge cycle complete");
    Ok(())
}
