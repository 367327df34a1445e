use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use url::Url;

use crate::document::{MixState, SessionDocument};
use crate::error::{PeerError, Result};
use crate::snapshot::{self, SnapshotFormat};

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Submit State and session reads.
    pub state: Duration,
    /// Stem uploads.
    pub stem: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            state: Duration::from_secs(10),
            stem: Duration::from_secs(60),
        }
    }
}

/// Everything needed to push one recorded track to a peer.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub stem_path: PathBuf,
    pub song_folder: String,
    pub common_track: String,
    pub user_id: String,
    pub track_name: String,
    pub mix: MixState,
}

#[derive(Serialize)]
struct StatePayload<'a> {
    song_folder: &'a str,
    common_track: &'a str,
    user_id: &'a str,
    track_name: &'a str,
    vol: f64,
    pan: f64,
    mute: f64,
    solo: f64,
}

/// What the remote peer reports after storing a stem.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StemAck {
    pub status: String,
    pub saved_as: String,
    pub duration_seconds: f64,
}

pub struct PeerClient {
    client: Client,
    base_url: Url,
    timeouts: Timeouts,
}

impl PeerClient {
    pub fn new(peer: &str, timeouts: Timeouts) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: parse_peer_url(peer)?,
            timeouts,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Submit State, then Submit Stem. The stem is not sent if the state update fails.
    pub async fn push(&self, request: &PushRequest) -> Result<StemAck> {
        self.submit_state(request).await?;
        self.submit_stem(
            &request.stem_path,
            &request.song_folder,
            &request.common_track,
            &request.user_id,
        )
        .await
    }

    pub async fn submit_state(&self, request: &PushRequest) -> Result<()> {
        let url = self.endpoint("incoming/state")?;
        let payload = StatePayload {
            song_folder: &request.song_folder,
            common_track: &request.common_track,
            user_id: &request.user_id,
            track_name: &request.track_name,
            vol: request.mix.volume,
            pan: request.mix.pan,
            mute: request.mix.mute,
            solo: request.mix.solo,
        };

        debug!("Submitting state for {}/{} to {}", request.song_folder, request.common_track, url);

        let response = self
            .client
            .post(url.clone())
            .json(&payload)
            .timeout(self.timeouts.state)
            .send()
            .await
            .map_err(|e| PeerError::Transport(format!("POST {} failed: {}", url, e)))?;
        ensure_success(response, &url).await?;

        Ok(())
    }

    pub async fn submit_stem(
        &self,
        stem_path: &Path,
        song_folder: &str,
        common_track: &str,
        user_id: &str,
    ) -> Result<StemAck> {
        let url = self.endpoint("incoming/stem")?;
        let file = tokio::fs::File::open(stem_path).await.map_err(|e| {
            PeerError::storage(format!("cannot open stem {}: {}", stem_path.display(), e))
        })?;
        let len = file
            .metadata()
            .await
            .map_err(|e| {
                PeerError::storage(format!("cannot stat stem {}: {}", stem_path.display(), e))
            })?
            .len();
        let file_name = stem_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PeerError::validation(format!("{} has no file name", stem_path.display()))
            })?;
        let mime = mime_guess::from_path(stem_path).first_or_octet_stream();

        info!("Uploading {} ({} bytes) to {}", file_name, len, url);

        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len)
            .file_name(file_name)
            .mime_str(mime.as_ref())?;
        // The stored name must match the local one byte for byte.
        let form = Form::new()
            .percent_encode_noop()
            .text("song_folder", song_folder.to_string())
            .text("common_track", common_track.to_string())
            .text("user_id", user_id.to_string())
            .part("file", part);

        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .timeout(self.timeouts.stem)
            .send()
            .await
            .map_err(|e| PeerError::Transport(format!("POST {} failed: {}", url, e)))?;
        let response = ensure_success(response, &url).await?;

        response
            .json::<StemAck>()
            .await
            .map_err(|e| PeerError::Transport(format!("unexpected reply from {}: {}", url, e)))
    }

    pub async fn fetch_session(&self, song_folder: &str) -> Result<SessionDocument> {
        let url = self.endpoint(&format!("session/{}", urlencoding::encode(song_folder)))?;

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeouts.state)
            .send()
            .await
            .map_err(|e| PeerError::Transport(format!("GET {} failed: {}", url, e)))?;
        let response = ensure_success(response, &url).await?;

        response
            .json::<SessionDocument>()
            .await
            .map_err(|e| PeerError::Transport(format!("unexpected reply from {}: {}", url, e)))
    }

    /// Fetches the peer's document for `song_folder` and replaces `out_path` with it.
    pub async fn pull(
        &self,
        song_folder: &str,
        out_path: &Path,
        format: SnapshotFormat,
    ) -> Result<SessionDocument> {
        let document = self.fetch_session(song_folder).await?;
        snapshot::write(out_path, &document, format).await?;

        info!(
            "Pulled {} ({} tracks, {} contributors) into {}",
            song_folder,
            document.tracks.len(),
            document.contributions.len(),
            out_path.display()
        );
        Ok(document)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PeerError::Transport(format!("bad endpoint {}: {}", path, e)))
    }
}

/// Accepts `http(s)://host:port[/prefix]` or a bare `host:port`.
pub fn parse_peer_url(peer: &str) -> Result<Url> {
    let trimmed = peer.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PeerError::validation("peer address is empty"));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| PeerError::validation(format!("invalid peer address {:?}: {}", peer, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PeerError::validation(format!("unsupported scheme in {:?}", peer)));
    }

    // Relative joins must extend the path, not replace its last segment.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn ensure_success(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(PeerError::Transport(format!("{} answered {}: {}", url, status, detail)))
}
