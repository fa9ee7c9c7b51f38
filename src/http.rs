//! Shared HTTP plumbing: one client for the whole run, plus the
//! transient-failure retry layer every outbound request goes through.
//!
//! Retry policy: connect errors, timeouts, and 429/5xx responses are
//! retried with exponential backoff (1s, 2s, 4s) up to three times,
//! after which the last outcome is surfaced to the caller as-is. Every
//! other status is returned immediately — callers decide what a 404 or
//! a 409 means for them.
use reqwest::StatusCode;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;

/// User-Agent sent on every request the dredger makes.
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; Dredger/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Build the shared HTTP client.
///
/// Per-request timeouts are set by callers (sitemap fetches, robots
/// probes, and import submissions each have their own budget), so only
/// the connect phase is bounded here.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Send a request with bounded retries on transient failures.
///
/// The request is rebuilt through the closure on every attempt because
/// `RequestBuilder` is consumed by `send()`.
pub async fn send_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut retry_count = 0;
    loop {
        match build().send().await {
            Ok(resp) if retry_count < MAX_RETRIES && is_retryable_status(resp.status()) => {
                tracing::debug!(
                    status = resp.status().as_u16(),
                    retry = retry_count + 1,
                    "Retrying after transient HTTP status"
                );
            }
            Ok(resp) => return Ok(resp),
            Err(e) if retry_count < MAX_RETRIES && is_transient(&e) => {
                tracing::debug!(
                    error = %e,
                    retry = retry_count + 1,
                    "Retrying after transient network error"
                );
            }
            Err(e) => return Err(e),
        }

        let delay = 1u64 << retry_count; // 1s, 2s, 4s
        tokio::time::sleep(Duration::from_secs(delay)).await;
        retry_count += 1;
    }
}
