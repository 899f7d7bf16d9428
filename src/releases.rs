//! Release Watcher - notifies when tracked GitHub repositories publish a
//! new semantic version.
//!
//! Each tick reads the repository list file, resolves the latest acceptable
//! release per line and compares it with the version recorded in
//! [`ReleaseState`]. Only an increase produces a notification; the very first
//! observation of a repository silently captures a baseline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use semver::Version;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::{optional, parse_duration, required, ReleaseWatcherConfig};
use crate::github::{GitHubClient, ReleaseInfo, ReleaseListing, ReleaseSource};
use crate::markdown::{emojify, github_markdown};
use crate::module::{wait_or_shutdown, Module, ModuleContext};
use crate::notify::{Notification, Notifier, NtfyNotifier};
use crate::store::ReleaseState;
use crate::Config;

/// ntfy message size limit
pub const MAX_MESSAGE_BYTES: usize = 4000;

/// One parsed line of the repository list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRepo {
    /// `owner/name`, lowercased
    pub repo: String,
    /// Pre-releases are acceptable
    pub beta: bool,
}

impl TrackedRepo {
    /// Parse `owner/repo[:beta]`; comment and blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut parts = line.split(':').map(|part| part.trim().to_lowercase());
        let repo = parts.next().filter(|r| !r.is_empty())?;
        let beta = parts.next().as_deref() == Some("beta");

        Some(Self { repo, beta })
    }

    fn owner_and_name(&self) -> Option<(&str, &str)> {
        self.repo
            .split_once('/')
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
    }
}

/// What a single repository check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Skipped comment or blank line
    Comment,
    /// First observation, version stored without notifying
    Baseline { version: String },
    /// Newer version stored and announced
    Notified { from: String, to: String },
    /// Older version stored without notifying
    Downgraded { from: String, to: String },
    /// Stored version already current
    Unchanged { version: String },
    /// No usable release for this repository
    NoRelease,
    /// Neither tag nor name holds a semantic version
    Unparseable,
    /// Repository does not exist; an error notification was sent
    NotFound,
}

/// Summary of one release check tick
#[derive(Debug, Clone, Default)]
pub struct CheckSummary {
    pub checked: usize,
    pub notified: usize,
    pub failed: usize,
}

/// The release watcher loop body
pub struct ReleaseWatcher {
    source: Arc<dyn ReleaseSource>,
    notifier: Arc<dyn Notifier>,
    state: ReleaseState,
    repo_file: PathBuf,
}

impl ReleaseWatcher {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        notifier: Arc<dyn Notifier>,
        state: ReleaseState,
        repo_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            notifier,
            state,
            repo_file: repo_file.into(),
        }
    }

    pub fn state(&self) -> &ReleaseState {
        &self.state
    }

    /// Check every repository line once. Failures of one line never stop the
    /// remaining lines; only an unreadable repository file fails the tick.
    pub async fn check_all(&mut self) -> Result<CheckSummary> {
        info!("Performing release check");

        let lines = load_repo_lines(&self.repo_file)?;
        info!("Found {} repos to check...", lines.len());

        let mut summary = CheckSummary::default();

        for line in &lines {
            match self.process_line(line).await {
                Ok(CheckOutcome::Comment) => {}
                Ok(outcome) => {
                    summary.checked += 1;
                    if matches!(outcome, CheckOutcome::Notified { .. }) {
                        summary.notified += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Failed to process line {}: {:?}", line, e);
                }
            }
        }

        Ok(summary)
    }

    /// Check a single repository line
    pub async fn process_line(&mut self, line: &str) -> Result<CheckOutcome> {
        let Some(tracked) = TrackedRepo::parse(line) else {
            debug!("Skipping commented repo line: {}", line);
            return Ok(CheckOutcome::Comment);
        };

        debug!("Processing {} - beta: {}", tracked.repo, tracked.beta);

        let (owner, name) = tracked
            .owner_and_name()
            .with_context(|| format!("Invalid repository line: {}", line))?;

        let releases = match self.source.list_releases(owner, name).await? {
            ReleaseListing::Found(releases) => releases,
            ReleaseListing::RepositoryNotFound => {
                error!("Repository not found: {}", tracked.repo);
                let notification = Notification::new(
                    "Error",
                    "exclamation",
                    format!("Repository not found: {}", tracked.repo),
                );
                if let Err(e) = self.notifier.send(&notification).await {
                    error!("Failed to send not-found notification: {:?}", e);
                }
                return Ok(CheckOutcome::NotFound);
            }
        };

        let Some(release) = select_release(&releases, tracked.beta) else {
            info!("No release found for {} - beta: {}", tracked.repo, tracked.beta);
            return Ok(CheckOutcome::NoRelease);
        };

        let Some(current) = sanitize_version(&release.tag_name, release.name.as_deref()) else {
            error!(
                "Unable to parse a version for {} from tag {:?} or name {:?}",
                tracked.repo, release.tag_name, release.name
            );
            return Ok(CheckOutcome::Unparseable);
        };

        let Some(last) = self.state.get(&tracked.repo).cloned() else {
            debug!(
                "No previous release found for {} in database. creating entry and skipping notification",
                tracked.repo
            );
            self.state.set(&tracked.repo, current.to_string())?;
            return Ok(CheckOutcome::Baseline {
                version: current.to_string(),
            });
        };

        let Ok(last_version) = Version::parse(&last) else {
            error!(
                "Unable to parse versions for {}. {} - last version {} - current version",
                tracked.repo, last, current
            );
            return Ok(CheckOutcome::Unparseable);
        };

        match current.cmp_precedence(&last_version) {
            Ordering::Greater => {
                info!("New release found for {}: {} -> {}", tracked.repo, last, current);

                self.state.set(&tracked.repo, current.to_string())?;

                let notification = release_notification(&tracked.repo, release, &current);
                self.notifier
                    .send(&notification)
                    .await
                    .with_context(|| format!("Failed to announce release of {}", tracked.repo))?;

                Ok(CheckOutcome::Notified {
                    from: last,
                    to: current.to_string(),
                })
            }
            Ordering::Less => {
                info!(
                    "Version downgrade on remote repository {} from {} to {}. Updating local database to reflect",
                    tracked.repo, last, current
                );
                self.state.set(&tracked.repo, current.to_string())?;
                Ok(CheckOutcome::Downgraded {
                    from: last,
                    to: current.to_string(),
                })
            }
            Ordering::Equal => {
                debug!(
                    "Found no increase in version from {} to {} for {}",
                    last, current, tracked.repo
                );
                Ok(CheckOutcome::Unchanged { version: last })
            }
        }
    }
}

pub const NAME: &str = "release-watcher";
pub const VERSION: &str = "1.4.8";

/// Validated module parameters
#[derive(Debug, Clone)]
pub struct ReleaseWatcherSettings {
    pub ntfy_url: String,
    pub ntfy_auth: Option<String>,
    pub check_interval: Duration,
    pub repo_file: PathBuf,
    pub db_file: PathBuf,
    pub github_token: Option<String>,
}

impl ReleaseWatcherSettings {
    pub fn from_config(config: &ReleaseWatcherConfig) -> Result<Self> {
        let check_interval = required(&config.check_interval, "release_watcher.check_interval")?;

        Ok(Self {
            ntfy_url: required(&config.ntfy_url, "release_watcher.ntfy_url")?.to_string(),
            ntfy_auth: optional(&config.ntfy_auth).map(str::to_string),
            check_interval: parse_duration(check_interval)
                .context("Invalid release_watcher.check_interval")?,
            repo_file: PathBuf::from(required(&config.repo_file, "release_watcher.repo_file")?),
            db_file: PathBuf::from(required(&config.db_file, "release_watcher.db_file")?),
            github_token: optional(&config.github_token).map(str::to_string),
        })
    }

    /// Wire up the GitHub source, ntfy notifier and persisted state
    pub fn into_watcher(self) -> Result<ReleaseWatcher> {
        let source = GitHubClient::new(self.github_token.as_deref())?;
        let notifier = NtfyNotifier::new(&self.ntfy_url, self.ntfy_auth.as_deref())?;
        let state = ReleaseState::open_releases(&self.db_file)
            .context("Failed to open release database")?;

        Ok(ReleaseWatcher::new(
            Arc::new(source),
            Arc::new(notifier),
            state,
            self.repo_file,
        ))
    }
}

/// Registry builder
pub fn build(config: &Config) -> Result<Option<Box<dyn Module>>> {
    let Some(section) = &config.release_watcher else {
        return Ok(None);
    };

    let settings = ReleaseWatcherSettings::from_config(section)?;
    Ok(Some(Box::new(ReleaseWatcherModule { settings })))
}

pub struct ReleaseWatcherModule {
    settings: ReleaseWatcherSettings,
}

#[async_trait]
impl Module for ReleaseWatcherModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self) -> &'static str {
        VERSION
    }

    async fn start(self: Box<Self>, ctx: &mut ModuleContext) -> Result<()> {
        let interval = self.settings.check_interval;
        let watcher = self.settings.into_watcher()?;

        let shutdown = ctx.shutdown_signal();
        ctx.spawn(NAME, check_loop(watcher, interval, shutdown));

        Ok(())
    }
}

/// Check immediately, then every `interval`, until shutdown
async fn check_loop(
    mut watcher: ReleaseWatcher,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Release check loop started with interval: {:?}", interval);

    loop {
        match watcher.check_all().await {
            Ok(summary) => debug!(
                "Release check finished: {} checked, {} notified, {} failed",
                summary.checked, summary.notified, summary.failed
            ),
            Err(e) => error!("Release check failed: {:?}", e),
        }

        if !wait_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    info!("Release check loop exiting");
}

/// Read the repository list, dropping blank lines
pub fn load_repo_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read repository file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// First non-draft release honouring the pre-release policy, falling back to
/// the first non-draft release of any kind
pub fn select_release(releases: &[ReleaseInfo], beta: bool) -> Option<&ReleaseInfo> {
    releases
        .iter()
        .find(|release| !release.draft && (beta || !release.prerelease))
        .or_else(|| releases.iter().find(|release| !release.draft))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)")
            .expect("valid version regex")
    })
}

/// Pull a semantic version out of free text such as `v1.2.3` or `Release 2.0.0-rc.1`
pub fn extract_version(text: &str) -> Option<Version> {
    let caps = version_re().captures(text)?;
    Version::parse(&caps[1]).ok()
}

/// Version from the tag, else from the display name
pub fn sanitize_version(tag: &str, name: Option<&str>) -> Option<Version> {
    extract_version(tag).or_else(|| name.and_then(extract_version))
}

/// Keep `body` if it fits `max_bytes`, else link to the full notes
pub fn truncate_release_body(body: &str, url: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        body.to_string()
    } else {
        debug!("Truncating release notes for {}", url);
        format!("Full release notes: [{}]({})", url, url)
    }
}

/// Compose the new-release notification
pub fn release_notification(repo: &str, release: &ReleaseInfo, version: &Version) -> Notification {
    let short_name = repo.split('/').nth(1).unwrap_or(repo);
    let title = format!("New release available for {}!", short_name);

    let published = release
        .published_at
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let headers = emojify(
        &[
            format!("**{}**", release.name.as_deref().unwrap_or(&release.tag_name)),
            format!("Repo: [{}]({})", repo, release.html_url),
            format!("Version: {}", version),
            format!("Published: {}", published),
            String::new(),
            String::new(),
        ]
        .join("\n"),
    );

    let max_body_bytes = MAX_MESSAGE_BYTES.saturating_sub(headers.len());
    let body = release
        .body
        .as_deref()
        .filter(|b| !b.is_empty())
        .unwrap_or("No release notes.");

    let message = headers
        + &truncate_release_body(&github_markdown(body, repo), &release.html_url, max_body_bytes);

    Notification::new(title, "loudspeaker", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool, draft: bool) -> ReleaseInfo {
        ReleaseInfo {
            tag_name: tag.to_string(),
            name: Some(format!("Release {}", tag)),
            draft,
            prerelease,
            body: Some("notes".to_string()),
            html_url: format!("https://github.com/o/r/releases/tag/{}", tag),
            published_at: None,
        }
    }

    #[test]
    fn test_parse_repo_lines() {
        assert_eq!(
            TrackedRepo::parse("Owner/Repo"),
            Some(TrackedRepo {
                repo: "owner/repo".to_string(),
                beta: false
            })
        );
        assert_eq!(
            TrackedRepo::parse("  owner/repo : BETA "),
            Some(TrackedRepo {
                repo: "owner/repo".to_string(),
                beta: true
            })
        );
        assert_eq!(
            TrackedRepo::parse("owner/repo:stable").map(|t| t.beta),
            Some(false)
        );
        assert_eq!(TrackedRepo::parse("# owner/repo"), None);
        assert_eq!(TrackedRepo::parse("   "), None);
    }

    #[test]
    fn test_select_skips_prerelease_for_stable_lines() {
        let releases = vec![
            release("v2.1.0-beta.1", true, false),
            release("v2.0.0", false, false),
        ];

        assert_eq!(select_release(&releases, false).unwrap().tag_name, "v2.0.0");
        assert_eq!(
            select_release(&releases, true).unwrap().tag_name,
            "v2.1.0-beta.1"
        );
    }

    #[test]
    fn test_select_falls_back_to_prerelease_and_skips_drafts() {
        let releases = vec![
            release("v3.0.0", false, true),
            release("v3.0.0-rc.1", true, false),
        ];
        assert_eq!(
            select_release(&releases, false).unwrap().tag_name,
            "v3.0.0-rc.1"
        );

        let drafts = vec![release("v1.0.0", false, true)];
        assert!(select_release(&drafts, true).is_none());
        assert!(select_release(&[], false).is_none());
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(extract_version("Release 10.0.1").unwrap(), Version::new(10, 0, 1));
        assert_eq!(
            extract_version("v2.1.0-beta.2").unwrap().to_string(),
            "2.1.0-beta.2"
        );
        assert_eq!(
            extract_version("1.0.0+build.5").unwrap().to_string(),
            "1.0.0+build.5"
        );
        assert!(extract_version("nightly").is_none());
        assert!(extract_version("v1.2").is_none());
    }

    #[test]
    fn test_sanitize_prefers_tag() {
        assert_eq!(
            sanitize_version("v1.0.0", Some("2.0.0")).unwrap(),
            Version::new(1, 0, 0)
        );
        assert_eq!(
            sanitize_version("latest", Some("Version 2.0.0")).unwrap(),
            Version::new(2, 0, 0)
        );
        assert!(sanitize_version("latest", None).is_none());
    }

    #[test]
    fn test_truncate_release_body() {
        assert_eq!(truncate_release_body("short", "u", 5), "short");
        assert_eq!(
            truncate_release_body("toolong", "https://x", 5),
            "Full release notes: [https://x](https://x)"
        );
        // byte length, not characters
        assert_eq!(
            truncate_release_body("ééé", "u", 5),
            "Full release notes: [u](u)"
        );
    }

    #[test]
    fn test_release_notification_layout() {
        let mut info = release("v1.3.0", false, false);
        info.name = Some("Big :rocket: release".to_string());
        info.body = Some("fixes #4".to_string());

        let n = release_notification("owner/repo", &info, &Version::new(1, 3, 0));

        assert_eq!(n.title, "New release available for repo!");
        assert_eq!(n.tag, "loudspeaker");
        assert!(n.message.starts_with("**Big 🚀 release**\nRepo: [owner/repo]("));
        assert!(n.message.contains("Version: 1.3.0\n"));
        assert!(n.message.contains("Published: unknown\n\n"));
        assert!(n
            .message
            .ends_with("fixes [#4](https://github.com/owner/repo/issues/4)"));
    }

    #[test]
    fn test_oversized_notes_become_link() {
        let mut info = release("v1.3.0", false, false);
        info.body = Some("x".repeat(MAX_MESSAGE_BYTES));

        let n = release_notification("owner/repo", &info, &Version::new(1, 3, 0));
        assert!(n.message.ends_with(&format!(
            "Full release notes: [{url}]({url})",
            url = info.html_url
        )));
        assert!(n.message.len() < MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_missing_notes_placeholder() {
        let mut info = release("v1.3.0", false, false);
        info.body = None;

        let n = release_notification("owner/repo", &info, &Version::new(1, 3, 0));
        assert!(n.message.ends_with("No release notes."));
    }

    #[test]
    fn test_module_settings() {
        assert!(build(&Config::default()).unwrap().is_none());

        let mut section = ReleaseWatcherConfig {
            check_interval: Some("1h".to_string()),
            repo_file: Some("/data/repos.txt".to_string()),
            db_file: Some("/data/releases.json".to_string()),
            ntfy_auth: Some("".to_string()),
            ..Default::default()
        };

        let err = ReleaseWatcherSettings::from_config(&section).unwrap_err();
        assert!(err.to_string().contains("release_watcher.ntfy_url"));

        section.ntfy_url = Some("https://ntfy.sh/releases".to_string());
        let settings = ReleaseWatcherSettings::from_config(&section).unwrap();
        assert_eq!(settings.check_interval, Duration::from_secs(3600));
        assert!(settings.ntfy_auth.is_none());
        assert!(settings.github_token.is_none());
    }
}
