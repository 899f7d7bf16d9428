//! Sync Engine - reconciles the import-time store against the Emby library
//!
//! A pass pages through every library item, applies the baseline rule to
//! each one and finally evicts entries that have been missing from Emby for
//! longer than the configured retention.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::emby::{MediaCatalog, MediaItem};
use crate::store::{Entry, ReconciliationStore};

/// Items requested per listing call
pub const PAGE_SIZE: usize = 250;

/// Store shared by the sync loop and the webhook handler
pub type SharedStore = Arc<Mutex<ReconciliationStore>>;

/// Result of reconciling one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// No entry existed; one was created from the item
    Created,
    /// Item is older than the stored baseline; baseline lowered
    BaselineLowered,
    /// Item drifted forward and Emby was corrected to the baseline
    Corrected,
    /// Item drifted forward but the correction write failed
    CorrectionFailed,
    /// Item matches the baseline; only lastSeen moved
    Refreshed,
}

/// Results from a complete reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub missing: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Apply the baseline rule to one item.
///
/// The caller must hold the store lock for the whole call so the
/// read-modify-write (including the correction request) is not interleaved
/// with another writer.
pub async fn reconcile_item(
    store: &mut ReconciliationStore,
    catalog: &dyn MediaCatalog,
    key: &str,
    item: &MediaItem,
    now: DateTime<Utc>,
) -> Result<ItemOutcome> {
    let remote = item.created_at()?;

    let Some(entry) = store.get(key).copied() else {
        store.set(
            key,
            Entry {
                baseline: remote,
                last_seen: now,
            },
        )?;
        debug!("Added entry for {} ({})", key, item.display_name());
        return Ok(ItemOutcome::Created);
    };

    let mut baseline = entry.baseline;
    let mut outcome = ItemOutcome::Refreshed;

    if remote < entry.baseline {
        info!(
            "Updating baseline for {} ({}) from {} to {}",
            key,
            item.display_name(),
            entry.baseline,
            remote
        );
        baseline = remote;
        outcome = ItemOutcome::BaselineLowered;
    } else if remote > entry.baseline {
        info!(
            "Updating Emby date for {} ({}) from {} to {}",
            key,
            item.display_name(),
            remote,
            entry.baseline
        );

        let mut corrected = item.clone();
        corrected.date_created = Some(entry.baseline.to_rfc3339_opts(SecondsFormat::Millis, true));

        outcome = match catalog.update_item(&corrected).await {
            Ok(()) => ItemOutcome::Corrected,
            Err(e) => {
                error!(
                    "Failed to update date for {} ({}): {:?}",
                    key,
                    item.display_name(),
                    e
                );
                ItemOutcome::CorrectionFailed
            }
        };
    }

    store.set(
        key,
        Entry {
            baseline,
            last_seen: now.max(entry.last_seen),
        },
    )?;

    Ok(outcome)
}

/// Orchestrates full reconciliation passes
#[derive(Clone)]
pub struct SyncEngine {
    catalog: Arc<dyn MediaCatalog>,
    store: SharedStore,
    user_id: String,
    retention: chrono::Duration,
    page_size: usize,
}

impl SyncEngine {
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        store: SharedStore,
        user_id: impl Into<String>,
        retention: Duration,
    ) -> Result<Self> {
        let retention =
            chrono::Duration::from_std(retention).context("Retention duration out of range")?;

        Ok(Self {
            catalog,
            store,
            user_id: user_id.into(),
            retention,
            page_size: PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Run one pass stamped with the current time
    pub async fn run_pass(&self) -> Result<SyncSummary> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass as if it happened at `now`
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<SyncSummary> {
        let start_time = Instant::now();
        info!("Beginning sync with Emby server...");

        let mut summary = SyncSummary::default();
        let mut seen = HashSet::new();
        let mut start_index = 0;

        loop {
            let items = self
                .catalog
                .list_items(&self.user_id, start_index, self.page_size)
                .await
                .with_context(|| format!("Failed to fetch items starting at {}", start_index))?;

            if items.is_empty() {
                break;
            }

            let count = items.len();

            for raw in items {
                let item = match MediaItem::from_value(raw) {
                    Ok(item) => item,
                    Err(e) => {
                        summary.failed += 1;
                        error!("Error processing item at index {}: {:?}", start_index, e);
                        continue;
                    }
                };

                let Some(key) = item.provider_key() else {
                    debug!(
                        "Skipping item due to missing providerId -- ({})",
                        item.display_name()
                    );
                    summary.skipped += 1;
                    continue;
                };

                debug!("Processing {} ({})", key, item.display_name());
                seen.insert(key.clone());

                let mut store = self.store.lock().await;
                match reconcile_item(&mut store, self.catalog.as_ref(), &key, &item, now).await {
                    Ok(ItemOutcome::Created) => summary.created += 1,
                    Ok(ItemOutcome::Corrected) => summary.updated += 1,
                    Ok(_) => {}
                    Err(e) => {
                        summary.failed += 1;
                        error!(
                            "Error processing {} ({}): {:?}",
                            item.display_name(),
                            item.id.as_deref().unwrap_or("?"),
                            e
                        );
                    }
                }
            }

            start_index += count;
            if count < self.page_size {
                break;
            }
        }

        self.evict_missing(&seen, now, &mut summary).await;

        summary.duration = start_time.elapsed();

        info!(
            "Finished syncing... Added {} database entries, Updated {} entries, \
             {} missing entries, Deleted {} entries.",
            summary.created, summary.updated, summary.missing, summary.deleted
        );

        Ok(summary)
    }

    async fn evict_missing(
        &self,
        seen: &HashSet<String>,
        now: DateTime<Utc>,
        summary: &mut SyncSummary,
    ) {
        let mut store = self.store.lock().await;

        for (key, entry) in store.entries() {
            if seen.contains(&key) {
                continue;
            }

            if now - entry.last_seen > self.retention {
                info!(
                    "Deleting {} from database due to being missing for longer than the \
                     forget time",
                    key
                );
                match store.delete(&key) {
                    Ok(()) => summary.deleted += 1,
                    Err(e) => {
                        error!("Failed to delete {}: {:?}", key, e);
                        summary.missing += 1;
                    }
                }
            } else {
                summary.missing += 1;
            }
        }
    }
}
