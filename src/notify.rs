use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// A push notification with a markdown body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub tag: String,
    pub message: String,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            tag: tag.into(),
            message: message.into(),
        }
    }
}

/// Delivery channel for notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// ntfy topic publisher
pub struct NtfyNotifier {
    client: Client,
    url: String,
    auth: Option<String>,
}

impl NtfyNotifier {
    pub fn new(url: &str, auth: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            auth: auth.map(str::to_string),
        })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Title", &notification.title)
            .header("Tags", &notification.tag)
            .header("Markdown", "yes")
            .body(notification.message.clone());

        if let Some(token) = &self.auth {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to publish ntfy notification")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("ntfy rejected notification ({}): {}", status, body);
        }

        debug!("Published notification: {}", notification.title);
        Ok(())
    }
}
