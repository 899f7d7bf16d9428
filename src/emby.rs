use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::{required, EmbyConfig};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Header shown on session messages sent by the trailer module
pub const MESSAGE_HEADER: &str = "Trailer Download System";

/// A library item as returned by Emby.
///
/// Only the fields the modules read are typed; everything else is kept in
/// `extra` so an item can be posted back unchanged apart from the edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ids: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// User attached to a webhook event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Webhook body posted by the Emby notification plugin.
///
/// `item` stays raw JSON until a handler asks for it, so an oddly shaped
/// item never rejects the whole request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub item: Option<Value>,
    #[serde(default)]
    pub user: Option<EventUser>,
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).context("Malformed webhook body")
    }

    /// The event's item, if it carries one
    pub fn media_item(&self) -> Option<Result<MediaItem>> {
        self.item.clone().map(MediaItem::from_value)
    }
}

/// One page of `/Users/{id}/Items`, items still raw
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsPage {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub total_record_count: Option<u64>,
}

/// An active client session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub last_activity_date: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Convert one raw item from a listing or a webhook body
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("Malformed Emby item")
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }

    /// Non-empty id for one provider. Emby may send nulls or bare numbers.
    pub fn provider_id(&self, provider: &str) -> Option<String> {
        let id = match self.provider_ids.as_ref()?.get(provider)? {
            Value::String(id) => id.trim().to_string(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };

        (!id.is_empty()).then_some(id)
    }

    /// Provider identifier in fixed priority order: Tmdb, Tvdb, then Imdb
    pub fn provider_key(&self) -> Option<String> {
        [("Tmdb", "tmdb"), ("Tvdb", "tvdb"), ("Imdb", "imdb")]
            .iter()
            .find_map(|(field, prefix)| {
                self.provider_id(field)
                    .map(|id| format!("{}:{}", prefix, id))
            })
    }

    /// Parsed `DateCreated`
    pub fn created_at(&self) -> Result<DateTime<Utc>> {
        let raw = self
            .date_created
            .as_deref()
            .context("Item has no DateCreated")?;

        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("Invalid DateCreated: {}", raw))
    }

    pub fn tmdb_id(&self) -> Option<String> {
        self.provider_id("Tmdb")
    }

    pub fn is_favorite(&self) -> bool {
        self.user_data.as_ref().is_some_and(|d| d.is_favorite)
    }
}

/// Remote item catalog the reconciliation engine works against
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// List one page of the user's library view. Items come back as raw
    /// JSON and are converted one at a time by the caller.
    async fn list_items(&self, user_id: &str, start_index: usize, limit: usize)
        -> Result<Vec<Value>>;

    /// Overwrite an item's metadata
    async fn update_item(&self, item: &MediaItem) -> Result<()>;
}

/// Emby REST client
#[derive(Debug, Clone)]
pub struct EmbyClient {
    client: Client,
    base_url: String,
    api_key: String,
    item_types: String,
}

impl EmbyClient {
    pub fn new(config: &EmbyConfig) -> Result<Self> {
        let url = required(&config.url, "emby.url")?;
        let api_key = required(&config.api_key, "emby.api_key")?;

        let client = Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("{}/emby", url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            item_types: "Movie,Episode".to_string(),
        })
    }

    /// Restrict full-sync listings to the given item types
    pub fn with_item_types(mut self, item_types: &[String]) -> Self {
        self.item_types = item_types.join(",");
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed ({}): {}", what, status, body);
        }
        Ok(response)
    }

    /// List active sessions
    pub async fn sessions(&self) -> Result<Vec<Session>> {
        let response = self
            .client
            .get(self.url("/Sessions"))
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await
            .context("Failed to GET /Sessions")?;

        Self::check(response, "Listing sessions")
            .await?
            .json()
            .await
            .context("Failed to parse sessions")
    }

    /// Show a message on one session
    pub async fn send_session_message(
        &self,
        session_id: &str,
        header: &str,
        text: &str,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/Sessions/{}/Message", session_id)))
            .header("X-Emby-Token", &self.api_key)
            .query(&[("Header", header), ("Text", text)])
            .send()
            .await
            .with_context(|| format!("Failed to message session {}", session_id))?;

        Self::check(response, "Sending session message").await?;
        Ok(())
    }

    /// Message every session of `user_id` active within the last 30 seconds
    pub async fn message_user(&self, user_id: &str, text: &str) -> Result<usize> {
        let now = Utc::now();
        let sessions = self.sessions().await?;

        let active: Vec<_> = sessions
            .into_iter()
            .filter(|session| session.user_id.as_deref() == Some(user_id))
            .filter(|session| {
                session
                    .last_activity_date
                    .is_some_and(|last| now - last < chrono::Duration::seconds(30))
            })
            .collect();

        for session in &active {
            self.send_session_message(&session.id, MESSAGE_HEADER, text)
                .await?;
        }

        debug!("Messaged {} active sessions of user {}", active.len(), user_id);
        Ok(active.len())
    }

    /// Test connectivity to Emby
    pub async fn test_connection(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/System/Info"))
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl MediaCatalog for EmbyClient {
    async fn list_items(
        &self,
        user_id: &str,
        start_index: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let start_index = start_index.to_string();
        let limit = limit.to_string();

        let response = self
            .client
            .get(self.url(&format!("/Users/{}/Items", user_id)))
            .header("X-Emby-Token", &self.api_key)
            .query(&[
                ("IncludeItemTypes", self.item_types.as_str()),
                ("Recursive", "true"),
                ("Fields", "DateCreated,ProviderIds"),
                ("StartIndex", start_index.as_str()),
                ("Limit", limit.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to list items at index {}", start_index))?;

        let page: ItemsPage = Self::check(response, "Listing items")
            .await?
            .json()
            .await
            .context("Failed to parse items page")?;

        Ok(page.items)
    }

    async fn update_item(&self, item: &MediaItem) -> Result<()> {
        let id = item.id.as_deref().context("Item has no Id")?;

        let response = self
            .client
            .post(self.url(&format!("/Items/{}", id)))
            .header("X-Emby-Token", &self.api_key)
            .json(item)
            .send()
            .await
            .with_context(|| format!("Failed to update item {}", id))?;

        Self::check(response, "Updating item").await?;
        Ok(())
    }
}
