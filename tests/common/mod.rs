//! Common test utilities and helpers for MediaSentry tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use http_body_util::BodyExt;
use mediasentry::emby::{MediaCatalog, MediaItem};
use mediasentry::store::ReconciliationStore;
use mediasentry::sync::SharedStore;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// In-memory Emby library that records correction writes
#[derive(Default)]
pub struct FakeCatalog {
    pub items: StdMutex<Vec<MediaItem>>,
    pub updates: StdMutex<Vec<MediaItem>>,
    pub fail_updates: bool,
    /// Time each correction write takes
    pub update_delay: Option<Duration>,
}

impl FakeCatalog {
    pub fn with_items(items: Vec<MediaItem>) -> Self {
        Self {
            items: StdMutex::new(items),
            ..Default::default()
        }
    }

    pub fn failing_updates() -> Self {
        Self {
            fail_updates: true,
            ..Default::default()
        }
    }

    pub fn slow_updates(delay: Duration) -> Self {
        Self {
            update_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn updates(&self) -> Vec<MediaItem> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaCatalog for FakeCatalog {
    async fn list_items(
        &self,
        _user_id: &str,
        start_index: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let items = self
            .items
            .lock()
            .unwrap()
            .iter()
            .skip(start_index)
            .take(limit)
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    async fn update_item(&self, item: &MediaItem) -> Result<()> {
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_updates {
            anyhow::bail!("Emby returned 500");
        }
        self.updates.lock().unwrap().push(item.clone());
        Ok(())
    }
}

/// Test store in a temporary directory
pub struct TestStore {
    pub temp_dir: TempDir,
    pub store: SharedStore,
}

impl TestStore {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ReconciliationStore::open_reconciliation(temp_dir.path().join("import.json"))
            .expect("Failed to open store");

        Self {
            temp_dir,
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("import.json")
    }
}

/// Emby item JSON as the webhook plugin sends it
pub fn item_json(id: &str, item_type: &str, providers: Value, date_created: &str) -> Value {
    json!({
        "Id": id,
        "Name": format!("Item {}", id),
        "Type": item_type,
        "ProviderIds": providers,
        "DateCreated": date_created,
        "Overview": "kept verbatim",
    })
}

pub fn media_item(id: &str, tmdb: &str, date_created: &str) -> MediaItem {
    serde_json::from_value(item_json(id, "Movie", json!({ "Tmdb": tmdb }), date_created))
        .expect("valid item")
}

/// JSON POST request
pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Helper to get response body as string
pub async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
