use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::document::SessionDocument;
use crate::duration::AudioProbe;
use crate::error::{PeerError, Result};
use crate::gateway::{Gateway, StateUpdate, StemMetadata, StemReceipt};
use crate::paths::SongId;
use crate::stems::{StagedStem, StemStore};
use crate::store::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub max_stem_bytes: usize,
}

impl AppState {
    pub fn new(gateway: Gateway, max_stem_bytes: usize) -> Self {
        Self {
            gateway: Arc::new(gateway),
            max_stem_bytes,
        }
    }

    /// Opens the stores under the configured data directory.
    pub async fn open(config: &Config) -> Result<Self> {
        let sessions = SessionStore::open(config.sessions_dir()).await?;
        let stems = StemStore::open(config.stems_dir(), config.staging_dir()).await?;
        let gateway = Gateway::new(Arc::new(sessions), stems, Arc::new(AudioProbe))
            .with_stem_dedupe(config.dedupe_stems);
        Ok(Self::new(gateway, config.max_stem_bytes))
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    let max_stem_bytes = state.max_stem_bytes;

    Router::new()
        .route("/incoming/state", post(incoming_state))
        .route(
            "/incoming/stem",
            post(incoming_stem).layer(DefaultBodyLimit::max(max_stem_bytes)),
        )
        .route("/session/:song_folder", get(get_session))
        .route("/health", get(health))
        .with_state(state)
}

// POST /incoming/state - Merge one track's mix state into the song
async fn incoming_state(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| PeerError::validation(format!("invalid JSON body: {}", e)))?;
    let update = StateUpdate::from_json(&body)?;

    state.gateway.submit_state(update).await?;

    Ok(Json(StatusResponse { status: "ok" }))
}

// POST /incoming/stem - Store an uploaded stem and credit its duration
async fn incoming_stem(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<StemReceipt>> {
    let mut multipart =
        multipart.map_err(|e| PeerError::validation(format!("expected multipart body: {}", e)))?;

    let mut metadata = StemMetadata::default();
    let mut staged: Option<StagedStem> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PeerError::validation(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                metadata.file_name = field.file_name().map(str::to_string);
                staged = Some(state.gateway.stage_blob(field).await?);
            }
            "song_folder" | "common_track" | "user_id" => {
                let value = field.text().await.map_err(|e| {
                    PeerError::validation(format!("unreadable field {}: {}", name, e))
                })?;
                match name.as_str() {
                    "song_folder" => metadata.song_folder = Some(value),
                    "common_track" => metadata.common_track = Some(value),
                    _ => metadata.user_id = Some(value),
                }
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let staged = staged.ok_or_else(|| PeerError::validation("missing file"))?;
    let receipt = state.gateway.submit_stem(metadata, staged).await?;

    Ok(Json(receipt))
}

// GET /session/:song_folder - Full session document, empty if the song is unknown
async fn get_session(
    State(state): State<AppState>,
    Path(song_folder): Path<String>,
) -> Result<Json<SessionDocument>> {
    let song = SongId::parse(&song_folder)?;
    let document = state.gateway.sessions().load(&song).await?;
    Ok(Json(document))
}

// GET /health - Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
