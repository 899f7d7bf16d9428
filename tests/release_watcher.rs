//! Release watcher scenarios against an in-memory release source

use anyhow::Result;
use assert_matches::assert_matches;
use async_trait::async_trait;
use mediasentry::github::{ReleaseInfo, ReleaseListing, ReleaseSource};
use mediasentry::notify::{Notification, Notifier};
use mediasentry::releases::{CheckOutcome, ReleaseWatcher};
use mediasentry::store::ReleaseState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Releases per `owner/name`; unknown repositories are "not found"
#[derive(Default)]
struct FakeSource {
    releases: Mutex<HashMap<String, Vec<ReleaseInfo>>>,
}

impl FakeSource {
    fn publish(&self, repo: &str, releases: Vec<ReleaseInfo>) {
        self.releases
            .lock()
            .unwrap()
            .insert(repo.to_string(), releases);
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<ReleaseListing> {
        let key = format!("{}/{}", owner, repo);
        Ok(match self.releases.lock().unwrap().get(&key) {
            Some(releases) => ReleaseListing::Found(releases.clone()),
            None => ReleaseListing::RepositoryNotFound,
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn release(tag: &str, prerelease: bool) -> ReleaseInfo {
    ReleaseInfo {
        tag_name: tag.to_string(),
        name: Some(format!("Release {}", tag)),
        draft: false,
        prerelease,
        body: Some("Thanks @octocat for #12".to_string()),
        html_url: format!("https://github.com/acme/tool/releases/tag/{}", tag),
        published_at: None,
    }
}

struct Fixture {
    temp_dir: TempDir,
    source: Arc<FakeSource>,
    notifier: Arc<RecordingNotifier>,
    watcher: ReleaseWatcher,
}

impl Fixture {
    fn new(repo_lines: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let repo_file = temp_dir.path().join("repos.txt");
        std::fs::write(&repo_file, repo_lines).unwrap();

        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = ReleaseState::open_releases(temp_dir.path().join("releases.json")).unwrap();
        let watcher = ReleaseWatcher::new(source.clone(), notifier.clone(), state, repo_file);

        Self {
            temp_dir,
            source,
            notifier,
            watcher,
        }
    }

    fn stored(&self, repo: &str) -> Option<String> {
        self.watcher.state().get(repo).cloned()
    }
}

#[tokio::test]
async fn test_first_sighting_records_baseline_silently() {
    let mut fx = Fixture::new("acme/tool\n");
    fx.source.publish("acme/tool", vec![release("v1.2.0", false)]);

    let summary = fx.watcher.check_all().await.unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.notified, 0);
    assert_eq!(fx.stored("acme/tool").as_deref(), Some("1.2.0"));
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_new_version_notifies_once() {
    let mut fx = Fixture::new("acme/tool\n");
    fx.source.publish("acme/tool", vec![release("v1.2.0", false)]);
    fx.watcher.check_all().await.unwrap();

    fx.source.publish(
        "acme/tool",
        vec![release("v1.3.0", false), release("v1.2.0", false)],
    );
    let outcome = fx.watcher.process_line("acme/tool").await.unwrap();

    assert_eq!(
        outcome,
        CheckOutcome::Notified {
            from: "1.2.0".to_string(),
            to: "1.3.0".to_string()
        }
    );
    assert_eq!(fx.stored("acme/tool").as_deref(), Some("1.3.0"));

    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "New release available for tool!");
    assert_eq!(sent[0].tag, "loudspeaker");
    assert!(sent[0].message.contains("Version: 1.3.0"));
    assert!(sent[0].message.contains(
        "[@octocat](https://github.com/octocat) for [#12](https://github.com/acme/tool/issues/12)"
    ));

    // Same release again: nothing new
    let outcome = fx.watcher.process_line("acme/tool").await.unwrap();
    assert_matches!(outcome, CheckOutcome::Unchanged { .. });
    assert_eq!(fx.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_downgrade_is_recorded_silently() {
    let mut fx = Fixture::new("acme/tool\n");
    fx.source.publish("acme/tool", vec![release("v1.3.0", false)]);
    fx.watcher.check_all().await.unwrap();

    fx.source.publish("acme/tool", vec![release("v1.2.0", false)]);
    let outcome = fx.watcher.process_line("acme/tool").await.unwrap();

    assert_matches!(outcome, CheckOutcome::Downgraded { .. });
    assert_eq!(fx.stored("acme/tool").as_deref(), Some("1.2.0"));
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_stable_line_skips_prerelease() {
    let mut fx = Fixture::new("acme/tool\nacme/beta-tool:beta\n");
    fx.source.publish("acme/tool", vec![release("v1.2.0", false)]);
    fx.source.publish("acme/beta-tool", vec![release("v1.2.0", false)]);
    fx.watcher.check_all().await.unwrap();

    let newer = vec![release("v2.0.0-beta.1", true), release("v1.2.0", false)];
    fx.source.publish("acme/tool", newer.clone());
    fx.source.publish("acme/beta-tool", newer);

    let summary = fx.watcher.check_all().await.unwrap();

    assert_eq!(summary.notified, 1);
    assert_eq!(fx.stored("acme/tool").as_deref(), Some("1.2.0"));
    assert_eq!(fx.stored("acme/beta-tool").as_deref(), Some("2.0.0-beta.1"));
}

#[tokio::test]
async fn test_missing_repository_reports_and_continues() {
    let mut fx = Fixture::new("# tracked repos\nghost/gone\nacme/tool\n");
    fx.source.publish("acme/tool", vec![release("v1.0.0", false)]);

    let summary = fx.watcher.check_all().await.unwrap();

    assert_eq!(summary.checked, 2);
    assert_eq!(fx.stored("acme/tool").as_deref(), Some("1.0.0"));

    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Error");
    assert_eq!(sent[0].tag, "exclamation");
    assert_eq!(sent[0].message, "Repository not found: ghost/gone");
}

#[tokio::test]
async fn test_unparseable_versions_are_skipped() {
    let mut fx = Fixture::new("acme/tool\n");
    fx.source.publish(
        "acme/tool",
        vec![ReleaseInfo {
            name: Some("Nightly".to_string()),
            ..release("nightly", false)
        }],
    );

    let outcome = fx.watcher.process_line("acme/tool").await.unwrap();

    assert_eq!(outcome, CheckOutcome::Unparseable);
    assert!(fx.stored("acme/tool").is_none());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let mut fx = Fixture::new("acme/tool\n");
    fx.source.publish("acme/tool", vec![release("v1.2.0", false)]);
    fx.watcher.check_all().await.unwrap();

    let reopened =
        ReleaseState::open_releases(fx.temp_dir.path().join("releases.json")).unwrap();
    assert_eq!(reopened.get("acme/tool").map(String::as_str), Some("1.2.0"));
}

#[tokio::test]
async fn test_unreadable_repo_file_fails_tick() {
    let mut fx = Fixture::new("");
    std::fs::remove_file(fx.temp_dir.path().join("repos.txt")).unwrap();

    assert!(fx.watcher.check_all().await.is_err());
}
