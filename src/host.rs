//! Module Host - runs every enabled module behind one HTTP listener
//!
//! The host builds each registered module from configuration, starts it,
//! serves the merged router and keeps going until Ctrl+C. A module that
//! fails to build or start is logged and skipped; its siblings still run.

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::module::ModuleContext;
use crate::registry::{ModuleEntry, MODULES};
use crate::Config;

/// Outcome of starting one registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    Started { version: &'static str },
    Disabled,
    Failed { reason: String },
}

/// Host state and control
pub struct Host {
    config: Arc<Config>,
    shutdown_sender: broadcast::Sender<()>,
}

impl Host {
    pub fn new(config: Config) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config: Arc::new(config),
            shutdown_sender,
        }
    }

    /// Sender that stops the server and every module loop
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Build and start every registered module
    pub async fn start_modules(
        &self,
        modules: &[ModuleEntry],
    ) -> (ModuleContext, Vec<(&'static str, ModuleStatus)>) {
        let mut ctx = ModuleContext::new(self.config.clone(), self.shutdown_sender.clone());
        let mut statuses = Vec::with_capacity(modules.len());

        for entry in modules {
            let status = Self::start_module(entry, &self.config, &mut ctx)
                .instrument(info_span!("module", id = entry.name))
                .await;
            statuses.push((entry.name, status));
        }

        (ctx, statuses)
    }

    async fn start_module(
        entry: &ModuleEntry,
        config: &Config,
        ctx: &mut ModuleContext,
    ) -> ModuleStatus {
        let module = match (entry.build)(config) {
            Ok(Some(module)) => module,
            Ok(None) => {
                debug!("Module {} not configured, skipping", entry.name);
                return ModuleStatus::Disabled;
            }
            Err(e) => {
                error!("Failed to configure module {}: {:?}", entry.name, e);
                return ModuleStatus::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let version = module.version();
        info!("Starting {} v{}", module.name(), version);

        match module.start(ctx).await {
            Ok(()) => ModuleStatus::Started { version },
            Err(e) => {
                error!("Failed to start module {}: {:?}", entry.name, e);
                ModuleStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run in the foreground until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        info!("Starting MediaSentry host");

        let (ctx, statuses) = self.start_modules(MODULES).await;

        let started = statuses
            .iter()
            .filter(|(_, status)| matches!(status, ModuleStatus::Started { .. }))
            .count();
        if started == 0 {
            warn!("No modules started; only /health will be served");
        }

        let (routes, tasks) = ctx.into_parts();
        let app = router(routes);

        let address = self.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {}", address))?;

        info!("Server listening on {}", address);

        // Spawn shutdown signal handler
        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping host...");
            let _ = shutdown_sender.send(());
        });

        let mut server_shutdown = self.shutdown_sender.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
            .context("HTTP server error")?;

        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!("Module {} loop ended abnormally: {:?}", name, e);
            }
        }

        info!("Host stopped");
        Ok(())
    }

    /// Wait for Ctrl+C
    async fn wait_for_shutdown_signal() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => debug!("Ctrl+C received"),
            Err(e) => error!("Failed to listen for ctrl-c: {:?}", e),
        }
    }
}

/// Module routes plus `/health`, with request tracing
pub fn router(routes: Router) -> Router {
    routes
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImportSaverConfig, ReleaseWatcherConfig};

    #[tokio::test]
    async fn test_unconfigured_modules_are_disabled() {
        let host = Host::new(Config::default());
        let (_, statuses) = host.start_modules(MODULES).await;

        assert_eq!(statuses.len(), MODULES.len());
        assert!(statuses
            .iter()
            .all(|(_, status)| *status == ModuleStatus::Disabled));
    }

    #[tokio::test]
    async fn test_broken_module_does_not_block_siblings() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("import.json");

        let config = Config {
            emby: crate::config::EmbyConfig {
                url: Some("http://127.0.0.1:9".to_string()),
                api_key: Some("key".to_string()),
            },
            import_saver: Some(ImportSaverConfig {
                library_view_user: Some("user".to_string()),
                db_path: Some(db_path.to_string_lossy().to_string()),
                sync_interval: Some("1h".to_string()),
                forget_time: Some("30d".to_string()),
                ..Default::default()
            }),
            // missing ntfy_url
            release_watcher: Some(ReleaseWatcherConfig::default()),
            ..Default::default()
        };

        let host = Host::new(config);
        let (ctx, statuses) = host.start_modules(MODULES).await;

        assert_eq!(
            statuses[0],
            ("import-saver", ModuleStatus::Started { version: "1.0.2" })
        );
        assert!(matches!(statuses[1].1, ModuleStatus::Failed { .. }));
        assert_eq!(statuses[2].1, ModuleStatus::Disabled);

        let _ = host.shutdown_handle().send(());
        let (_, tasks) = ctx.into_parts();
        for (_, handle) in tasks {
            handle.await.unwrap();
        }
    }
}
