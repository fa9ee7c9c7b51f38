//! Per-domain politeness pacing.
//!
//! Each domain's crawl-delay is resolved once — from its robots.txt
//! `Crawl-delay:` directive when available, otherwise the configured
//! default — and cached for the rest of the run. `wait_if_needed` is
//! the only place in the pipeline that deliberately stalls.
use rand::Rng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

use crate::http::send_with_retry;

const ROBOTS_TXT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RateLimiter {
    client: reqwest::Client,
    default_delay_secs: f64,
    respect_robots_txt: bool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_request: HashMap<String, Instant>,
    crawl_delays: HashMap<String, f64>,
}

impl RateLimiter {
    pub fn new(client: reqwest::Client, default_delay_secs: f64, respect_robots_txt: bool) -> Self {
        Self {
            client,
            default_delay_secs,
            respect_robots_txt,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Block until it is polite to issue the next request to `url`'s
    /// domain, then record the request time for that domain.
    ///
    /// The sleep is jittered by U(0.5, 1.5) so repeated visits to one
    /// domain never tick at a uniform, fingerprintable interval.
    pub async fn wait_if_needed(&self, url: &str) {
        let Some(domain) = domain_of(url) else {
            return;
        };
        let delay = self.crawl_delay_for(url, &domain).await;

        let pause = {
            let inner = self.inner.lock().expect("rate limiter lock poisoned");
            inner.last_request.get(&domain).and_then(|last| {
                let elapsed = last.elapsed().as_secs_f64();
                if elapsed < delay {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    Some(Duration::from_secs_f64((delay - elapsed) * jitter))
                } else {
                    None
                }
            })
        };

        if let Some(pause) = pause {
            tracing::debug!(
                domain = %domain,
                pause_ms = pause.as_millis() as u64,
                "Pacing request"
            );
            tokio::time::sleep(pause).await;
        }

        self.inner
            .lock()
            .expect("rate limiter lock poisoned")
            .last_request
            .insert(domain, Instant::now());
    }

    /// Resolve (and memoize) the crawl delay for a domain.
    async fn crawl_delay_for(&self, url: &str, domain: &str) -> f64 {
        if let Some(delay) = self
            .inner
            .lock()
            .expect("rate limiter lock poisoned")
            .crawl_delays
            .get(domain)
        {
            return *delay;
        }

        let mut delay = self.default_delay_secs;
        if self.respect_robots_txt {
            if let Some(found) = self.fetch_crawl_delay(url, domain).await {
                tracing::debug!(domain = %domain, delay_secs = found, "Using robots.txt crawl-delay");
                delay = found;
            }
        }

        self.inner
            .lock()
            .expect("rate limiter lock poisoned")
            .crawl_delays
            .insert(domain.to_string(), delay);
        delay
    }

    /// Fetch robots.txt and scan it for a crawl-delay. Any failure —
    /// unreachable, non-200, malformed — yields `None` and the caller
    /// falls back to the default.
    async fn fetch_crawl_delay(&self, url: &str, domain: &str) -> Option<f64> {
        let robots_url = format!("{}://{}/robots.txt", robots_scheme(url), domain);
        let resp = send_with_retry(|| self.client.get(&robots_url).timeout(ROBOTS_TXT_TIMEOUT))
            .await
            .ok()?;
        if resp.status() != reqwest::StatusCode::OK {
            return None;
        }
        let body = resp.text().await.ok()?;
        parse_crawl_delay(&body)
    }
}

/// First parsable `Crawl-delay:` value in a robots.txt body.
fn parse_crawl_delay(robots: &str) -> Option<f64> {
    for line in robots.lines() {
        let lower = line.trim().to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("crawl-delay:") {
            if let Ok(secs) = value.trim().parse::<f64>() {
                // Guard against nonsense that would panic Duration math.
                if secs.is_finite() && secs >= 0.0 {
                    return Some(secs);
                }
            }
        }
    }
    None
}

/// Pacing key for a URL: host plus explicit port, like a netloc.
fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Scheme for the robots.txt probe, derived from the target URL.
/// Loopback and private-network hosts are probed over plaintext — LAN
/// deployments of the backends rarely terminate TLS.
fn robots_scheme(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(p) => p,
        Err(_) => return "https".to_string(),
    };
    let scheme = parsed.scheme();
    if scheme == "https" && parsed.host_str().is_some_and(is_private_host) {
        return "http".to_string();
    }
    scheme.to_string()
}

fn is_private_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}
