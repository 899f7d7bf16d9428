//! Module plumbing shared by every automation module
//!
//! A module is built from configuration by its [`registry`](crate::registry)
//! entry and then started once with a [`ModuleContext`]. Starting a module
//! registers its HTTP routes and spawns its timer loops; it never blocks.

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};

use crate::emby::EmbyClient;
use crate::Config;

/// A pluggable automation module
#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    /// Register routes and spawn background loops
    async fn start(self: Box<Self>, ctx: &mut ModuleContext) -> Result<()>;
}

/// Shared resources handed to each module at start
pub struct ModuleContext {
    config: Arc<Config>,
    emby: Option<EmbyClient>,
    router: Router,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ModuleContext {
    pub fn new(config: Arc<Config>, shutdown: broadcast::Sender<()>) -> Self {
        let emby = match EmbyClient::new(&config.emby) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!("Emby client unavailable: {}", e);
                None
            }
        };

        Self {
            config,
            emby,
            router: Router::new(),
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared Emby client; fails with the missing parameter when the
    /// `emby` section is incomplete
    pub fn emby(&self) -> Result<EmbyClient> {
        match &self.emby {
            Some(client) => Ok(client.clone()),
            None => EmbyClient::new(&self.config.emby),
        }
    }

    /// Mount a module's routes on the shared router
    pub fn merge_routes(&mut self, routes: Router) {
        self.router = std::mem::take(&mut self.router).merge(routes);
    }

    /// New receiver on the host-wide shutdown channel
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Spawn a module loop inside a `module` span
    pub fn spawn<F>(&mut self, module: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task.instrument(info_span!("module", id = module)));
        self.tasks.push((module, handle));
    }

    /// Hand the finished router and loop handles to the host
    pub fn into_parts(self) -> (Router, Vec<(&'static str, JoinHandle<()>)>) {
        (self.router, self.tasks)
    }
}

/// Sleep for `period` unless shutdown arrives first.
///
/// Returns `false` when the loop should stop.
pub async fn wait_or_shutdown(period: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = shutdown.recv() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_elapses_without_shutdown() {
        let (tx, mut rx) = broadcast::channel(1);
        assert!(wait_or_shutdown(Duration::from_millis(5), &mut rx).await);
        drop(tx);
    }

    #[tokio::test]
    async fn test_wait_stops_on_shutdown() {
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        assert!(!wait_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }

    #[tokio::test]
    async fn test_missing_emby_section_reported_on_use() {
        let (tx, _) = broadcast::channel(1);
        let ctx = ModuleContext::new(Arc::new(Config::default()), tx);

        let err = ctx.emby().unwrap_err();
        assert!(err.to_string().contains("emby.url"));
    }

    #[tokio::test]
    async fn test_spawned_tasks_are_tracked() {
        let (tx, _) = broadcast::channel(1);
        let mut ctx = ModuleContext::new(Arc::new(Config::default()), tx);

        ctx.spawn("test", async {});
        let (_, tasks) = ctx.into_parts();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, "test");
        for (_, handle) in tasks {
            handle.await.unwrap();
        }
    }
}
