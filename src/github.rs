use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

/// Release metadata the watcher cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub name: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    pub body: Option<String>,
    pub html_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Outcome of listing a repository's releases
#[derive(Debug, Clone)]
pub enum ReleaseListing {
    /// Releases, newest first
    Found(Vec<ReleaseInfo>),
    /// The repository does not exist or is not visible
    RepositoryNotFound,
}

/// Source of release listings
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<ReleaseListing>;
}

/// GitHub authentication strategies
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// Token from the module configuration
    ConfiguredToken,
    /// Use environment variable token
    EnvironmentToken,
    /// Use GitHub CLI authentication
    GitHubCLI,
}

/// GitHub releases client
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    /// Create a client, resolving a token from config, GITHUB_TOKEN, or `gh`
    pub fn new(configured_token: Option<&str>) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(configured_token)?;

        info!("Using GitHub authentication strategy: {:?}", auth_strategy);

        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    /// Create a client against a custom API root (GitHub Enterprise, tests)
    pub fn with_base_uri(base_uri: &str, token: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .base_uri(base_uri)
            .context("Invalid GitHub base URI")?
            .personal_token(token.to_string())
            .build()
            .context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(configured_token: Option<&str>) -> Result<(AuthStrategy, String)> {
        if let Some(token) = configured_token.filter(|t| !t.is_empty()) {
            return Ok((AuthStrategy::ConfiguredToken, token.to_string()));
        }

        if let Ok(token) = Self::try_environment_token() {
            Ok((AuthStrategy::EnvironmentToken, token))
        } else if let Ok(token) = Self::try_github_cli() {
            Ok((AuthStrategy::GitHubCLI, token))
        } else {
            Err(anyhow!(
                "No GitHub authentication found. Please either:\n\
                 1. Set release_watcher.github_token in the config file\n\
                 2. Set GITHUB_TOKEN environment variable\n\
                 3. Install and authenticate GitHub CLI: gh auth login"
            ))
        }
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !token.starts_with("ghp_")
            && !token.starts_with("gho_")
            && !token.starts_with("ghs_")
            && !token.starts_with("github_pat_")
        {
            warn!("GITHUB_TOKEN doesn't look like a valid GitHub token");
        }

        Ok(token)
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to run GitHub CLI")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        Ok(token)
    }
}

#[async_trait]
impl ReleaseSource for GitHubClient {
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<ReleaseListing> {
        debug!("Fetching releases for {}/{}", owner, repo);

        let result = self
            .client
            .repos(owner, repo)
            .releases()
            .list()
            .send()
            .await;

        let page = match result {
            Ok(page) => page,
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                return Ok(ReleaseListing::RepositoryNotFound);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to fetch releases for {}/{}", owner, repo));
            }
        };

        let releases = page
            .items
            .into_iter()
            .map(|release| ReleaseInfo {
                tag_name: release.tag_name,
                name: release.name,
                draft: release.draft,
                prerelease: release.prerelease,
                body: release.body,
                html_url: release.html_url.to_string(),
                published_at: release.published_at,
            })
            .collect();

        Ok(ReleaseListing::Found(releases))
    }
}
