use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use super::{format_message, Notifier, Severity};

pub struct SlackNotifier {
    webhook_url: Option<String>,
    client: Client,
    timeout: Duration,
}

impl SlackNotifier {
    /// `None` turns the notifier into a logging-only no-op.
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn post(&self, url: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({ "text": text });
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, severity: Severity, message: &str) {
        let text = format_message(severity, message);
        let Some(url) = &self.webhook_url else {
            tracing::debug!(%text, "Slack disabled (no SLACK_WEBHOOK_URL)");
            return;
        };
        match self.post(url, &text).await {
            Ok(()) => tracing::debug!(%severity, "slack message sent"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "slack message failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_prefixed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({ "text": "[ERROR] boom" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let n = SlackNotifier::new(Some(format!("{}/hook", server.uri())));
        n.notify(Severity::Error, "boom").await;
    }

    #[tokio::test]
    async fn webhook_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let n = SlackNotifier::new(Some(server.uri()));
        // Must not panic or propagate.
        n.notify(Severity::Warn, "ignored").await;
    }

    #[tokio::test]
    async fn missing_webhook_is_noop() {
        let n = SlackNotifier::new(Some("   ".into()));
        n.notify(Severity::Info, "nothing happens").await;
    }
}
