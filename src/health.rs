//! System health checks for MediaSentry
//!
//! Preflight checks behind `mediasentry doctor`: each module's configuration,
//! the files it will touch and the remote services it talks to.

use crate::config::ReleaseWatcherConfig;
use crate::emby::EmbyClient;
use crate::import_saver::ImportSaverSettings;
use crate::radarr::RadarrClient;
use crate::releases::{load_repo_lines, ReleaseWatcherSettings};
use crate::trailers::TrailerSettings;
use crate::Config;
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Emby connectivity
    pub emby: CheckResult,
    /// Import-time saver configuration and database
    pub import_saver: CheckResult,
    /// Release watcher configuration, repo list and database
    pub release_watcher: CheckResult,
    /// Trailer requests configuration and Radarr connectivity
    pub trailer_requests: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn not_configured(section: &str) -> Self {
        Self::warning(format!("Module disabled ({} section absent)", section))
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config) -> Self {
        Self {
            emby: Self::check_emby(config).await,
            import_saver: Self::check_import_saver(config),
            release_watcher: Self::check_release_watcher(config),
            trailer_requests: Self::check_trailer_requests(config).await,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    async fn check_emby(config: &Config) -> CheckResult {
        let needs_emby = config.import_saver.is_some() || config.trailer_requests.is_some();

        let client = match EmbyClient::new(&config.emby) {
            Ok(client) => client,
            Err(e) if needs_emby => {
                return CheckResult::error_with_details("Emby not configured", e.to_string())
            }
            Err(_) => return CheckResult::warning("Emby not configured (no module needs it)"),
        };

        match client.test_connection().await {
            Ok(true) => CheckResult::ok("Emby reachable"),
            Ok(false) => CheckResult::error_with_details(
                "Emby rejected the request",
                "Check emby.api_key",
            ),
            Err(e) => CheckResult::error_with_details("Emby unreachable", e.to_string()),
        }
    }

    fn check_import_saver(config: &Config) -> CheckResult {
        let Some(section) = &config.import_saver else {
            return CheckResult::not_configured("import_saver");
        };

        match ImportSaverSettings::from_config(section) {
            Ok(settings) => Self::check_state_file(&settings.db_path),
            Err(e) => CheckResult::error_with_details("Invalid import_saver config", e.to_string()),
        }
    }

    fn check_release_watcher(config: &Config) -> CheckResult {
        let Some(section) = &config.release_watcher else {
            return CheckResult::not_configured("release_watcher");
        };

        Self::check_release_settings(section)
    }

    fn check_release_settings(section: &ReleaseWatcherConfig) -> CheckResult {
        let settings = match ReleaseWatcherSettings::from_config(section) {
            Ok(settings) => settings,
            Err(e) => {
                return CheckResult::error_with_details(
                    "Invalid release_watcher config",
                    e.to_string(),
                )
            }
        };

        let repos = match load_repo_lines(&settings.repo_file) {
            Ok(lines) => lines.iter().filter(|l| !l.starts_with('#')).count(),
            Err(e) => {
                return CheckResult::error_with_details("Repository list unreadable", e.to_string())
            }
        };

        let state = Self::check_state_file(&settings.db_file);
        if !state.passed {
            return state;
        }

        CheckResult::ok_with_details(
            "Release watcher ready",
            format!("{} repositories tracked", repos),
        )
    }

    async fn check_trailer_requests(config: &Config) -> CheckResult {
        let Some(section) = &config.trailer_requests else {
            return CheckResult::not_configured("trailer_requests");
        };

        let settings = match TrailerSettings::from_config(section) {
            Ok(settings) => settings,
            Err(e) => {
                return CheckResult::error_with_details(
                    "Invalid trailer_requests config",
                    e.to_string(),
                )
            }
        };

        let client = match RadarrClient::new(&settings.radarr_url, &settings.radarr_api_key) {
            Ok(client) => client,
            Err(e) => return CheckResult::error_with_details("Radarr client error", e.to_string()),
        };

        match client.test_connection().await {
            Ok(true) => CheckResult::ok("Radarr reachable"),
            Ok(false) => CheckResult::error_with_details(
                "Radarr rejected the request",
                "Check trailer_requests.radarr_api_key",
            ),
            Err(e) => CheckResult::error_with_details("Radarr unreachable", e.to_string()),
        }
    }

    /// The state file's directory must exist (or be creatable) and be writable
    fn check_state_file(path: &Path) -> CheckResult {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        if let Err(e) = std::fs::create_dir_all(dir) {
            return CheckResult::error_with_details(
                "State directory cannot be created",
                format!("{}: {}", dir.display(), e),
            );
        }

        let probe = dir.join(".mediasentry-write-test");
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                CheckResult::ok_with_details("State file writable", path.display().to_string())
            }
            Err(e) => CheckResult::error_with_details(
                "State directory not writable",
                format!("{}: {}", dir.display(), e),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Emby", &self.emby),
            ("Import Saver", &self.import_saver),
            ("Release Watcher", &self.release_watcher),
            ("Trailer Requests", &self.trailer_requests),
        ]
    }
}
