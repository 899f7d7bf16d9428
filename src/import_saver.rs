//! Import-time saver - keeps Emby's `DateCreated` pinned to the first time
//! an item was ever imported, even across deletes and re-imports.
//!
//! The module has two entry points sharing one [`SharedStore`]: the periodic
//! full sync ([`SyncEngine`]) and the `library.new` webhook, which applies the
//! same rule to the single item in the event.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Router,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{parse_duration, required, ImportSaverConfig};
use crate::emby::{MediaCatalog, WebhookEvent};
use crate::module::{wait_or_shutdown, Module, ModuleContext};
use crate::store::ReconciliationStore;
use crate::sync::{reconcile_item, SharedStore, SyncEngine};
use crate::Config;

pub const NAME: &str = "import-saver";
pub const VERSION: &str = "1.0.2";

/// Validated module parameters
#[derive(Debug, Clone)]
pub struct ImportSaverSettings {
    pub library_view_user: String,
    pub db_path: PathBuf,
    pub sync_interval: Duration,
    pub forget_time: Duration,
    pub perform_initial_sync: bool,
    pub item_types: Vec<String>,
}

impl ImportSaverSettings {
    pub fn from_config(config: &ImportSaverConfig) -> Result<Self> {
        let library_view_user =
            required(&config.library_view_user, "import_saver.library_view_user")?;
        let db_path = required(&config.db_path, "import_saver.db_path")?;
        let sync_interval = required(&config.sync_interval, "import_saver.sync_interval")?;
        let forget_time = required(&config.forget_time, "import_saver.forget_time")?;

        if config.item_types.is_empty() {
            bail!("import_saver.item_types must name at least one item type");
        }

        Ok(Self {
            library_view_user: library_view_user.to_string(),
            db_path: PathBuf::from(db_path),
            sync_interval: parse_duration(sync_interval)
                .context("Invalid import_saver.sync_interval")?,
            forget_time: parse_duration(forget_time).context("Invalid import_saver.forget_time")?,
            perform_initial_sync: config.perform_initial_sync,
            item_types: config.item_types.clone(),
        })
    }
}

/// Registry builder
pub fn build(config: &Config) -> Result<Option<Box<dyn Module>>> {
    let Some(section) = &config.import_saver else {
        return Ok(None);
    };

    let settings = ImportSaverSettings::from_config(section)?;
    Ok(Some(Box::new(ImportSaver { settings })))
}

pub struct ImportSaver {
    settings: ImportSaverSettings,
}

#[async_trait]
impl Module for ImportSaver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self) -> &'static str {
        VERSION
    }

    async fn start(self: Box<Self>, ctx: &mut ModuleContext) -> Result<()> {
        let settings = self.settings;

        let catalog: Arc<dyn MediaCatalog> =
            Arc::new(ctx.emby()?.with_item_types(&settings.item_types));

        let store = ReconciliationStore::open_reconciliation(&settings.db_path)
            .context("Failed to open import-time database")?;
        let store: SharedStore = Arc::new(Mutex::new(store));

        let engine = SyncEngine::new(
            catalog.clone(),
            store.clone(),
            settings.library_view_user.clone(),
            settings.forget_time,
        )?;

        ctx.merge_routes(webhook_routes(WebhookState::new(
            catalog,
            store,
            settings.item_types.clone(),
        )));

        let shutdown = ctx.shutdown_signal();
        ctx.spawn(
            NAME,
            sync_loop(
                engine,
                settings.sync_interval,
                settings.perform_initial_sync,
                shutdown,
            ),
        );

        Ok(())
    }
}

/// Run a pass, then sleep, until shutdown
async fn sync_loop(
    engine: SyncEngine,
    interval: Duration,
    run_immediately: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Sync loop started with interval: {:?}", interval);

    if !run_immediately && !wait_or_shutdown(interval, &mut shutdown).await {
        return;
    }

    loop {
        if let Err(e) = engine.run_pass().await {
            error!("Failed to sync: {:?}", e);
        }

        if !wait_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    info!("Sync loop exiting");
}

/// State behind `POST /import-saver`
#[derive(Clone)]
pub struct WebhookState {
    catalog: Arc<dyn MediaCatalog>,
    store: SharedStore,
    item_types: Arc<[String]>,
}

impl WebhookState {
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        store: SharedStore,
        item_types: Vec<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            item_types: item_types.into(),
        }
    }
}

pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/import-saver", post(handle_webhook))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<WebhookState>,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let event = WebhookEvent::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("{:#}", e)))?;

    if event.event == "system.notificationtest" {
        return Ok(StatusCode::OK);
    }

    if event.event != "library.new" {
        info!("Unhandled event received: {}", event.event);
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unhandled event: {}", event.event),
        ));
    }

    info!("Received media added event...");

    let item = match event.media_item() {
        Some(Ok(item)) => item,
        Some(Err(e)) => {
            warn!("Ignoring malformed item: {:#}", e);
            return Ok(StatusCode::OK);
        }
        None => {
            info!("Ignoring event without an item");
            return Ok(StatusCode::OK);
        }
    };

    let item_type = item.item_type.as_deref().unwrap_or_default();
    if !state.item_types.iter().any(|t| t == item_type) {
        info!("Ignoring item of type: {}", item_type);
        return Ok(StatusCode::OK);
    }

    let Some(key) = item.provider_key() else {
        info!(
            "Ignoring item due to missing providerId -- ({})",
            item.display_name()
        );
        return Ok(StatusCode::OK);
    };

    let mut store = state.store.lock().await;
    match reconcile_item(&mut store, state.catalog.as_ref(), &key, &item, Utc::now()).await {
        Ok(outcome) => debug!("Webhook reconciled {}: {:?}", key, outcome),
        Err(e) => error!("Failed to process {} ({}): {:?}", key, item.display_name(), e),
    }

    Ok(StatusCode::OK)
}
