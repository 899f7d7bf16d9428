use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Connection timeout for Radarr API requests
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Radarr quality profile
#[derive(Debug, Clone, Deserialize)]
pub struct QualityProfile {
    pub id: i64,
    pub name: String,
}

/// Radarr tag
#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub label: String,
}

/// One entry of a Radarr validation error response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFailure {
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Radarr answered with a non-success status
#[derive(Debug)]
pub struct RadarrRejected {
    pub status: u16,
    pub failures: Vec<ValidationFailure>,
    pub body: String,
}

impl RadarrRejected {
    /// Radarr refused because the movie is already in the library
    pub fn is_movie_exists(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.error_code.as_deref() == Some("MovieExistsValidator"))
    }
}

impl fmt::Display for RadarrRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Radarr rejected request ({}): {}", self.status, self.body)
    }
}

impl std::error::Error for RadarrRejected {}

/// Radarr v3 API client
#[derive(Clone)]
pub struct RadarrClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RadarrClient {
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let failures = serde_json::from_str(&body).unwrap_or_default();

        Err(RadarrRejected {
            status,
            failures,
            body,
        }
        .into())
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to GET {}", path))?;

        Self::check(response)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response of {}", path))
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to POST {}", path))?;

        Self::check(response).await
    }

    /// Movie metadata for a TMDB id, as Radarr would add it
    pub async fn lookup_tmdb(&self, tmdb_id: &str) -> Result<Value> {
        self.get(&format!("/movie/lookup/tmdb?tmdbId={}", tmdb_id))
            .await
    }

    pub async fn quality_profiles(&self) -> Result<Vec<QualityProfile>> {
        self.get("/qualityprofile").await
    }

    pub async fn tags(&self) -> Result<Vec<Tag>> {
        self.get("/tag").await
    }

    pub async fn create_tag(&self, label: &str) -> Result<Tag> {
        debug!("Creating Radarr tag {}", label);
        self.post("/tag", &serde_json::json!({ "label": label }))
            .await?
            .json()
            .await
            .context("Failed to parse created tag")
    }

    /// Existing tag matching `label` case-insensitively, else a new one
    pub async fn find_or_create_tag(&self, label: &str) -> Result<Tag> {
        let wanted = label.to_lowercase();
        let existing = self
            .tags()
            .await?
            .into_iter()
            .find(|tag| tag.label.to_lowercase() == wanted);

        match existing {
            Some(tag) => Ok(tag),
            None => self.create_tag(label).await,
        }
    }

    pub async fn add_movie(&self, movie: &Value) -> Result<()> {
        self.post("/movie", movie).await?;
        Ok(())
    }

    /// Test connectivity to Radarr
    pub async fn test_connection(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/system/status"))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}
