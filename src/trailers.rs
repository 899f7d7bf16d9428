//! Trailer requests - favoriting a trailer in Emby asks Radarr to download
//! the movie, and the user is told the outcome on their active sessions.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{required, TrailerRequestsConfig};
use crate::emby::{EmbyClient, EventUser, MediaItem, WebhookEvent};
use crate::module::{Module, ModuleContext};
use crate::radarr::{RadarrClient, RadarrRejected};
use crate::Config;

pub const NAME: &str = "trailer-requests";
pub const VERSION: &str = "1.0.2";

const MSG_ALREADY_REQUESTED: &str =
    "Movie already requested. Try searching for it or check back later.";
const MSG_FAILED: &str = "Failed to request download. Please try favoriting again.";

/// Validated module parameters
#[derive(Debug, Clone)]
pub struct TrailerSettings {
    pub radarr_url: String,
    pub radarr_api_key: String,
    pub root_folder_path: String,
    pub quality_profile: String,
    pub radarr_tag: String,
}

impl TrailerSettings {
    pub fn from_config(config: &TrailerRequestsConfig) -> Result<Self> {
        Ok(Self {
            radarr_url: required(&config.radarr_url, "trailer_requests.radarr_url")?.to_string(),
            radarr_api_key: required(&config.radarr_api_key, "trailer_requests.radarr_api_key")?
                .to_string(),
            root_folder_path: required(
                &config.root_folder_path,
                "trailer_requests.root_folder_path",
            )?
            .to_string(),
            quality_profile: required(&config.quality_profile, "trailer_requests.quality_profile")?
                .to_string(),
            radarr_tag: required(&config.radarr_tag, "trailer_requests.radarr_tag")?.to_string(),
        })
    }
}

/// Registry builder
pub fn build(config: &Config) -> Result<Option<Box<dyn Module>>> {
    let Some(section) = &config.trailer_requests else {
        return Ok(None);
    };

    let settings = TrailerSettings::from_config(section)?;
    Ok(Some(Box::new(TrailerRequests { settings })))
}

pub struct TrailerRequests {
    settings: TrailerSettings,
}

#[async_trait]
impl Module for TrailerRequests {
    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self) -> &'static str {
        VERSION
    }

    async fn start(self: Box<Self>, ctx: &mut ModuleContext) -> Result<()> {
        let radarr = RadarrClient::new(&self.settings.radarr_url, &self.settings.radarr_api_key)?;
        let state = TrailerState::new(radarr, ctx.emby()?, self.settings);

        ctx.merge_routes(trailer_routes(state));
        Ok(())
    }
}

/// State behind `POST /trailer-request`
#[derive(Clone)]
pub struct TrailerState {
    radarr: RadarrClient,
    emby: EmbyClient,
    settings: Arc<TrailerSettings>,
}

impl TrailerState {
    pub fn new(radarr: RadarrClient, emby: EmbyClient, settings: TrailerSettings) -> Self {
        Self {
            radarr,
            emby,
            settings: Arc::new(settings),
        }
    }

    /// Add the trailer's movie to Radarr on behalf of `user`
    pub async fn request_download(&self, item: &MediaItem, user: &EventUser) -> Result<()> {
        let tmdb_id = item
            .tmdb_id()
            .with_context(|| format!("No tmdb ID found for {}. Skipping.", item.display_name()))?;

        let mut movie = self
            .radarr
            .lookup_tmdb(&tmdb_id)
            .await
            .with_context(|| format!("Failed to look up tmdb {}", tmdb_id))?;

        let quality_profile_id = self
            .radarr
            .quality_profiles()
            .await?
            .into_iter()
            .find(|profile| profile.name == self.settings.quality_profile)
            .map(|profile| profile.id)
            .with_context(|| {
                format!(
                    "Couldn't associate {} with a quality profile in radarr",
                    self.settings.quality_profile
                )
            })?;

        let tag = self
            .radarr
            .find_or_create_tag(&format!("{}-{}", self.settings.radarr_tag, user.name))
            .await?;

        let Value::Object(fields) = &mut movie else {
            bail!("Unexpected Radarr lookup response for tmdb {}", tmdb_id);
        };

        if let Ok(id) = tmdb_id.parse::<i64>() {
            fields.insert("tmdbId".to_string(), json!(id));
        }
        fields.insert("monitored".to_string(), json!(true));
        fields.insert(
            "rootFolderPath".to_string(),
            json!(self.settings.root_folder_path),
        );
        fields.insert("qualityProfileId".to_string(), json!(quality_profile_id));
        fields.insert("tags".to_string(), json!([tag.id]));
        fields.insert("addOptions".to_string(), json!({ "searchForMovie": true }));

        self.radarr.add_movie(&movie).await?;

        info!("Successfully added {} to radarr", item.display_name());
        Ok(())
    }

    /// Best-effort message to the user's active sessions
    async fn tell_user(&self, user: &EventUser, text: &str) {
        if user.id.is_empty() {
            warn!("No user on event, cannot send message: {}", text);
            return;
        }

        if let Err(e) = self.emby.message_user(&user.id, text).await {
            error!("Failed to message user {}: {:?}", user.name, e);
        }
    }
}

pub fn trailer_routes(state: TrailerState) -> Router {
    Router::new()
        .route("/trailer-request", post(handle_trailer_request))
        .with_state(state)
}

fn title_with_year(item: &MediaItem) -> String {
    match item.production_year {
        Some(year) => format!("{} ({})", item.display_name(), year),
        None => item.display_name().to_string(),
    }
}

async fn handle_trailer_request(
    State(state): State<TrailerState>,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let event = WebhookEvent::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("{:#}", e)))?;

    if event.event == "system.notificationtest" {
        return Ok(StatusCode::OK);
    }

    if event.event != "item.rate" {
        info!("Unhandled event received: {}", event.event);
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unhandled event: {}", event.event),
        ));
    }

    let item = match event.media_item() {
        Some(Ok(item)) => item,
        Some(Err(e)) => {
            warn!("Ignoring malformed item: {:#}", e);
            return Ok(StatusCode::OK);
        }
        None => return Ok(StatusCode::OK),
    };

    if item.item_type.as_deref() != Some("Trailer") || !item.is_favorite() {
        return Ok(StatusCode::OK);
    }

    let user = event.user.unwrap_or_default();
    let title = title_with_year(&item);

    info!("Received download request for {}", title);

    match state.request_download(&item, &user).await {
        Ok(()) => {
            state
                .tell_user(
                    &user,
                    &format!(
                        "Successfully requested download of \"{}\". Please wait a while for the download to process.",
                        title
                    ),
                )
                .await;
            Ok(StatusCode::OK)
        }
        Err(e) => {
            let exists = e
                .downcast_ref::<RadarrRejected>()
                .is_some_and(RadarrRejected::is_movie_exists);

            if exists {
                error!("Failed to download, movie already exists");
                state.tell_user(&user, MSG_ALREADY_REQUESTED).await;
            } else {
                error!("Failed to request {}: {:?}", title, e);
                state.tell_user(&user, MSG_FAILED).await;
            }

            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to request {}", title),
            ))
        }
    }
}
