//! End-of-run webhook notification.
//!
//! The payload carries the summary under both `content` (Discord) and
//! `text` (Slack/ntfy) so one URL works for any of them. Best-effort:
//! failures are logged and swallowed, never propagated.
use std::time::Duration;

use crate::storage::RunSummary;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn send_summary(client: &reqwest::Client, webhook_url: &str, summary: &RunSummary) {
    let text = format!(
        "Recipe Dredger Complete\n   Imported: {}\n   Rejected: {}\n   Retry Queue: {}\n   Cached Sitemaps: {}",
        summary.imported, summary.rejected, summary.retry_queue, summary.cached_sites
    );
    let body = serde_json::json!({ "content": text, "text": text });

    match client
        .post(webhook_url)
        .timeout(NOTIFY_TIMEOUT)
        .json(&body)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => tracing::info!("Notification sent"),
        Ok(resp) => tracing::warn!(
            status = resp.status().as_u16(),
            "Notification webhook returned an error"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to send notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary() -> RunSummary {
        RunSummary {
            imported: 12,
            rejected: 34,
            retry_queue: 2,
            cached_sites: 5,
        }
    }

    #[tokio::test]
    async fn test_sends_summary_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        send_summary(&client, &format!("{}/hook", server.uri()), &summary()).await;

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["content"].as_str().unwrap().contains("Imported: 12"));
        assert_eq!(body["content"], body["text"]);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        // Must not panic or propagate.
        send_summary(&client, &format!("{}/hook", server.uri()), &summary()).await;
    }
}
