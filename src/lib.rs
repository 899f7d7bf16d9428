//! MediaSentry - a small host for Emby automation modules
//!
//! Each module is configured from its own section of the YAML config file,
//! started once by the [`host`], and then runs its own timer loop and/or
//! webhook routes on a shared HTTP listener.
//!
//! ## Modules
//!
//! - **import-saver**: pins each library item's `DateCreated` to the first
//!   time it was ever imported ([`sync`], [`import_saver`])
//! - **release-watcher**: ntfy notifications for new GitHub releases
//!   ([`releases`])
//! - **trailer-requests**: favoriting a trailer requests the movie in Radarr
//!   ([`trailers`])
//!
//! ## Supporting modules
//!
//! - [`config`]: configuration management and parsing
//! - [`store`]: JSON file persistence for module state
//! - [`emby`], [`github`], [`radarr`], [`notify`]: remote service clients

pub mod config;
pub mod emby;
pub mod github;
pub mod health;
pub mod host;
pub mod import_saver;
pub mod markdown;
pub mod module;
pub mod notify;
pub mod radarr;
pub mod registry;
pub mod releases;
pub mod store;
pub mod sync;
pub mod trailers;

pub use config::Config;
pub use emby::{EmbyClient, MediaCatalog, MediaItem};
pub use github::GitHubClient;
pub use health::HealthCheck;
pub use host::Host;
pub use releases::ReleaseWatcher;
pub use store::{Entry, ReconciliationStore, ReleaseState};
pub use sync::{SyncEngine, SyncSummary};
