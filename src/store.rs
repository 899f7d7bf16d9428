//! State Management - JSON file persistence for module state
//!
//! Every stateful module owns exactly one document of the form
//! `{ "<collection>": { "<key>": <value>, ... } }`. The document is loaded once
//! at module start and rewritten synchronously after every mutation.
//!
//! Two collections are in use:
//! - `movies`: provider identifier -> [`Entry`] (import-time synchronizer)
//! - `releases`: `owner/repo` -> last recorded version (release watcher)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reconciliation record for one tracked media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Earliest known creation time of the item
    pub baseline: DateTime<Utc>,
    /// Last time a sync pass or webhook observed the item
    pub last_seen: DateTime<Utc>,
}

/// Keyed store backed by a single JSON document
#[derive(Debug)]
pub struct KeyValueStore<V> {
    path: PathBuf,
    collection: &'static str,
    data: BTreeMap<String, V>,
}

/// Import-time store: provider identifier -> entry
pub type ReconciliationStore = KeyValueStore<Entry>;

/// Release watcher store: repository -> version string
pub type ReleaseState = KeyValueStore<String>;

impl ReconciliationStore {
    pub fn open_reconciliation(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, "movies")
    }
}

impl ReleaseState {
    pub fn open_releases(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, "releases")
    }
}

impl<V> KeyValueStore<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Load the collection from `path`, starting empty when the file is absent
    pub fn open(path: impl Into<PathBuf>, collection: &'static str) -> Result<Self> {
        let path = path.into();

        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state file {}", path.display()))?;

            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                let mut document: BTreeMap<String, BTreeMap<String, V>> =
                    serde_json::from_str(&content).with_context(|| {
                        format!("Failed to parse state file {}", path.display())
                    })?;
                document.remove(collection).unwrap_or_default()
            }
        } else {
            BTreeMap::new()
        };

        info!(
            "State file {} opened with {} {} entries",
            path.display(),
            data.len(),
            collection
        );

        Ok(Self {
            path,
            collection,
            data,
        })
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.data.get(key)
    }

    /// Insert or replace `key` and persist. On a failed write the previous
    /// value is restored before the error is returned.
    pub fn set(&mut self, key: &str, value: V) -> Result<()> {
        let previous = self.data.insert(key.to_string(), value);

        if let Err(e) = self.persist() {
            match previous {
                Some(old) => self.data.insert(key.to_string(), old),
                None => self.data.remove(key),
            };
            return Err(e);
        }

        debug!("Stored {} entry {}", self.collection, key);
        Ok(())
    }

    /// Remove `key` and persist. Removing an absent key is a no-op.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let Some(previous) = self.data.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.persist() {
            self.data.insert(key.to_string(), previous);
            return Err(e);
        }

        debug!("Deleted {} entry {}", self.collection, key);
        Ok(())
    }

    /// Snapshot of every entry, sorted by key
    pub fn entries(&self) -> Vec<(String, V)> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole document through a temporary sibling file
    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory {}", parent.display())
                })?;
            }
        }

        let mut document = BTreeMap::new();
        document.insert(self.collection, &self.data);
        let content =
            serde_json::to_string_pretty(&document).context("Failed to serialize state")?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write state file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace state file {}", self.path.display()))?;

        Ok(())
    }
}
