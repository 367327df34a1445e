//! Ingestion gateway: validates what remote peers send and applies it to the
//! local session documents.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::{MixState, TrackKey};
use crate::duration::DurationProbe;
use crate::error::{PeerError, Result};
use crate::merge::MergeOutcome;
use crate::paths::{SongId, StemLocator, StemName};
use crate::stems::{CommittedStem, StagedStem, StemStore};
use crate::store::SessionStore;

pub const UNKNOWN_SONG: &str = "Song_Unknown";
pub const UNKNOWN_TRACK: &str = "UNKNOWN";
pub const UNKNOWN_USER: &str = "UNKNOWN";

const STATE_FIELDS: [&str; 8] = [
    "song_folder",
    "common_track",
    "user_id",
    "track_name",
    "vol",
    "pan",
    "mute",
    "solo",
];

/// A validated Submit State request.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub song: SongId,
    pub key: TrackKey,
    pub track_name: String,
    pub mix: MixState,
}

impl StateUpdate {
    /// Validates a Submit State body. Every field is required; mix values are
    /// coerced to `f64` but not range-checked.
    pub fn from_json(body: &Value) -> Result<Self> {
        let fields = body
            .as_object()
            .ok_or_else(|| PeerError::validation("state body must be a JSON object"))?;

        let missing: Vec<&str> = STATE_FIELDS
            .iter()
            .copied()
            .filter(|name| !fields.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(PeerError::validation(format!("missing fields: {}", missing.join(", "))));
        }

        Ok(Self {
            song: SongId::parse(&text_field(fields, "song_folder")?)?,
            key: TrackKey::new(text_field(fields, "common_track")?, text_field(fields, "user_id")?),
            track_name: text_field(fields, "track_name")?,
            mix: MixState {
                volume: number_field(fields, "vol")?,
                pan: number_field(fields, "pan")?,
                mute: number_field(fields, "mute")?,
                solo: number_field(fields, "solo")?,
            },
        })
    }
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Result<String> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(PeerError::validation(format!(
            "{} must be a string, got {}",
            name, other
        ))),
        None => Err(PeerError::validation(format!("missing field: {}", name))),
    }
}

fn number_field(fields: &Map<String, Value>, name: &str) -> Result<f64> {
    let value = match fields.get(name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(_) => None,
        None => return Err(PeerError::validation(format!("missing field: {}", name))),
    };

    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(PeerError::validation(format!(
            "{} is not a finite number: {}",
            name, fields[name]
        ))),
    }
}

/// Metadata that accompanies a stem upload. Absent values fall back to the
/// `UNKNOWN_*` sentinels; the upload itself is never refused for missing metadata.
#[derive(Debug, Clone, Default)]
pub struct StemMetadata {
    pub song_folder: Option<String>,
    pub common_track: Option<String>,
    pub user_id: Option<String>,
    pub file_name: Option<String>,
}

impl StemMetadata {
    fn song_folder(&self) -> &str {
        non_empty(&self.song_folder).unwrap_or(UNKNOWN_SONG)
    }

    fn common_track(&self) -> &str {
        non_empty(&self.common_track).unwrap_or(UNKNOWN_TRACK)
    }

    fn user_id(&self) -> &str {
        non_empty(&self.user_id).unwrap_or(UNKNOWN_USER)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize)]
pub struct StemReceipt {
    pub status: &'static str,
    pub saved_as: StemLocator,
    pub duration_seconds: f64,
}

pub struct Gateway {
    sessions: Arc<SessionStore>,
    stems: StemStore,
    probe: Arc<dyn DurationProbe>,
    dedupe_stems: bool,
}

impl Gateway {
    pub fn new(
        sessions: Arc<SessionStore>,
        stems: StemStore,
        probe: Arc<dyn DurationProbe>,
    ) -> Self {
        Self {
            sessions,
            stems,
            probe,
            dedupe_stems: false,
        }
    }

    /// Count each distinct blob (by md5) at most once per song.
    pub fn with_stem_dedupe(mut self, enabled: bool) -> Self {
        self.dedupe_stems = enabled;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stems(&self) -> &StemStore {
        &self.stems
    }

    pub async fn submit_state(&self, update: StateUpdate) -> Result<MergeOutcome> {
        let StateUpdate { song, key, track_name, mix } = update;
        let outcome = self
            .sessions
            .upsert_track(&song, key.clone(), &track_name, mix)
            .await?;

        info!(
            "State {} for {}/{}/{} ({})",
            match outcome {
                MergeOutcome::Appended => "added",
                MergeOutcome::Replaced { .. } => "updated",
            },
            song,
            key.common_track,
            key.user_id,
            self.sessions.strategy().name()
        );
        Ok(outcome)
    }

    /// Streams an incoming blob into the staging area. Any chunk error aborts
    /// the upload and discards what was written.
    pub async fn stage_blob<S, E>(&self, chunks: S) -> Result<StagedStem>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let mut chunks = std::pin::pin!(chunks);
        let mut staged = self.stems.stage().await?;
        while let Some(chunk) = chunks.next().await {
            let chunk =
                chunk.map_err(|e| PeerError::validation(format!("upload interrupted: {}", e)))?;
            staged.write_chunk(&chunk).await?;
        }
        Ok(staged)
    }

    /// Stores a fully received blob, then credits its duration to the uploader.
    ///
    /// Failing to decode the duration does not fail the upload; it only means
    /// nothing is credited and `duration_seconds` is reported as 0.
    pub async fn submit_stem(
        &self,
        metadata: StemMetadata,
        staged: StagedStem,
    ) -> Result<StemReceipt> {
        let song = SongId::parse(metadata.song_folder())?;
        let user_id = metadata.user_id().to_string();
        let name = match non_empty(&metadata.file_name) {
            Some(raw) => StemName::parse(raw)?,
            None => StemName::generated(metadata.common_track(), &user_id, Utc::now().timestamp()),
        };

        let committed = self.stems.commit(staged, &song, &name).await?;
        let duration = self.measure(&committed).await;

        if duration > 0.0 {
            let digest = self.dedupe_stems.then_some(committed.digest.as_str());
            self.sessions
                .credit_stem(&song, &user_id, duration, digest)
                .await?;
        }

        info!(
            "Stem {} from {} ({} bytes, {:.3}s)",
            committed.locator, user_id, committed.len, duration
        );

        Ok(StemReceipt {
            status: "ok",
            saved_as: committed.locator,
            duration_seconds: duration,
        })
    }

    /// Convenience for callers that already hold the whole blob in memory.
    pub async fn submit_stem_bytes(
        &self,
        metadata: StemMetadata,
        blob: Bytes,
    ) -> Result<StemReceipt> {
        let staged = self
            .stage_blob(futures::stream::iter([Ok::<_, std::convert::Infallible>(blob)]))
            .await?;
        self.submit_stem(metadata, staged).await
    }

    async fn measure(&self, committed: &CommittedStem) -> f64 {
        let probe = self.probe.clone();
        let path = committed.path.clone();
        let result = tokio::task::spawn_blocking(move || probe.duration_seconds(&path))
            .await
            .unwrap_or_else(|e| Err(PeerError::Decode(format!("duration probe panicked: {}", e))));

        match result {
            Ok(seconds) if seconds.is_finite() && seconds > 0.0 => seconds,
            Ok(seconds) => {
                warn!(
                    "Stem {} has no usable duration ({}), not crediting",
                    committed.locator, seconds
                );
                0.0
            }
            Err(e) => {
                warn!("Stem {} not credited: {}", committed.locator, e);
                0.0
            }
        }
    }
}
