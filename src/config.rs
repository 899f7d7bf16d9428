use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for MediaSentry
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Emby server shared by the media modules
    #[serde(default)]
    pub emby: EmbyConfig,

    /// Import-time synchronizer (absent = disabled)
    #[serde(default)]
    pub import_saver: Option<ImportSaverConfig>,

    /// GitHub release watcher (absent = disabled)
    #[serde(default)]
    pub release_watcher: Option<ReleaseWatcherConfig>,

    /// Trailer favorite -> Radarr request bridge (absent = disabled)
    #[serde(default)]
    pub trailer_requests: Option<TrailerRequestsConfig>,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "full"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// Emby connection settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EmbyConfig {
    /// Base URL, e.g. "http://emby:8096"
    pub url: Option<String>,

    /// API key sent as X-Emby-Token
    pub api_key: Option<String>,
}

/// Import-time synchronizer settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportSaverConfig {
    /// Emby user whose library view is listed during a full sync
    pub library_view_user: Option<String>,

    /// JSON state file
    pub db_path: Option<String>,

    /// Time between full syncs, e.g. "6h"
    pub sync_interval: Option<String>,

    /// How long an entry may be missing from Emby before it is forgotten
    pub forget_time: Option<String>,

    /// Run a full sync immediately on startup
    #[serde(default)]
    pub perform_initial_sync: bool,

    /// Item types tracked by the synchronizer
    #[serde(default = "default_item_types")]
    pub item_types: Vec<String>,
}

impl Default for ImportSaverConfig {
    fn default() -> Self {
        Self {
            library_view_user: None,
            db_path: None,
            sync_interval: None,
            forget_time: None,
            perform_initial_sync: false,
            item_types: default_item_types(),
        }
    }
}

/// Release watcher settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ReleaseWatcherConfig {
    /// ntfy topic URL
    pub ntfy_url: Option<String>,

    /// ntfy access token
    pub ntfy_auth: Option<String>,

    /// Time between release checks, e.g. "1h"
    pub check_interval: Option<String>,

    /// File listing one `owner/repo[:beta]` per line
    pub repo_file: Option<String>,

    /// JSON state file
    pub db_file: Option<String>,

    /// GitHub token (falls back to GITHUB_TOKEN, then the GitHub CLI)
    pub github_token: Option<String>,
}

/// Trailer request settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TrailerRequestsConfig {
    pub radarr_url: Option<String>,
    pub radarr_api_key: Option<String>,
    pub root_folder_path: Option<String>,
    pub quality_profile: Option<String>,
    pub radarr_tag: Option<String>,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3001
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}
fn default_item_types() -> Vec<String> {
    vec!["Movie".to_string(), "Episode".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

/// Fetch a required module parameter, failing with the parameter's name.
pub fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(anyhow!("Missing required config parameter: {}", name)),
    }
}

/// Fetch an optional module parameter, treating empty strings as unset.
pub fn optional(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parse duration strings like "30s", "15m", "1h", "7d", "2w" or bare seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    if let Some(value) = duration_str.strip_suffix("ms") {
        return value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("Invalid milliseconds value");
    }

    let (value, multiplier, unit) = if let Some(value) = duration_str.strip_suffix('s') {
        (value, 1, "seconds")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value, 60, "minutes")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value, 3600, "hours")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value, 86400, "days")
    } else if let Some(value) = duration_str.strip_suffix('w') {
        (value, 604800, "weeks")
    } else {
        let secs = duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'")?;
        return Ok(Duration::from_secs(secs));
    };

    let secs = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {} value", unit))?
        .checked_mul(multiplier)
        .context("Duration too large")?;

    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("mediasentry").join("config.yml"))
    }

    /// Expand environment variables in state and list file paths
    pub fn expand_paths(&mut self) -> Result<()> {
        fn expand(field: &mut Option<String>, name: &str) -> Result<()> {
            if let Some(value) = field.as_mut() {
                *value = shellexpand::full(value.as_str())
                    .with_context(|| format!("Failed to expand {} path", name))?
                    .into_owned();
            }
            Ok(())
        }

        if let Some(import_saver) = self.import_saver.as_mut() {
            expand(&mut import_saver.db_path, "import_saver.db_path")?;
        }

        if let Some(watcher) = self.release_watcher.as_mut() {
            expand(&mut watcher.repo_file, "release_watcher.repo_file")?;
            expand(&mut watcher.db_file, "release_watcher.db_file")?;
        }

        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
