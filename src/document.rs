use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Wire format of `updated_at`, local wall-clock time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identity of a track record within one song.
///
/// Matching is plain string equality; renaming a common track on one peer
/// therefore yields a new record rather than updating the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub common_track: String,
    pub user_id: String,
}

impl TrackKey {
    pub fn new(common_track: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            common_track: common_track.into(),
            user_id: user_id.into(),
        }
    }
}

/// Mixer values for one channel. Ranges are whatever the DAW sends.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MixState {
    pub volume: f64,
    pub pan: f64,
    pub mute: f64,
    pub solo: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub song_folder: String,
    pub common_track: String,
    pub user_id: String,
    pub track_name: String,
    #[serde(rename = "vol")]
    pub volume: f64,
    pub pan: f64,
    pub mute: f64,
    pub solo: f64,
    #[serde(with = "timestamp")]
    pub updated_at: NaiveDateTime,
}

impl TrackRecord {
    pub fn new(
        song_folder: impl Into<String>,
        key: TrackKey,
        track_name: impl Into<String>,
        mix: MixState,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            song_folder: song_folder.into(),
            common_track: key.common_track,
            user_id: key.user_id,
            track_name: track_name.into(),
            volume: mix.volume,
            pan: mix.pan,
            mute: mix.mute,
            solo: mix.solo,
            updated_at,
        }
    }

    pub fn matches(&self, common_track: &str, user_id: &str) -> bool {
        self.common_track == common_track && self.user_id == user_id
    }

    pub fn mix(&self) -> MixState {
        MixState {
            volume: self.volume,
            pan: self.pan,
            mute: self.mute,
            solo: self.solo,
        }
    }
}

/// Seconds of recorded audio a user has contributed to a song.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContributionEntry {
    #[serde(default)]
    pub total_seconds: f64,
}

/// Merged view of one song as held by this peer.
///
/// `tracks` keeps first-insertion order. `contributions` only ever grows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub contributions: BTreeMap<String, ContributionEntry>,
    /// md5 digests of stems already accounted, kept only when dedupe is enabled.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub counted_stems: BTreeSet<String>,
}

impl SessionDocument {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty() && self.contributions.is_empty()
    }

    pub fn track(&self, common_track: &str, user_id: &str) -> Option<&TrackRecord> {
        self.tracks.iter().find(|t| t.matches(common_track, user_id))
    }

    pub fn total_seconds(&self, user_id: &str) -> f64 {
        self.contributions
            .get(user_id)
            .map(|entry| entry.total_seconds)
            .unwrap_or(0.0)
    }

    /// Adds `seconds` to the user's ledger entry, creating it at zero if absent.
    ///
    /// Returns `false` and leaves the ledger untouched unless `seconds` is a
    /// finite value greater than zero.
    pub fn credit(&mut self, user_id: &str, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds <= 0.0 {
            return false;
        }
        let entry = self.contributions.entry(user_id.to_string()).or_default();
        entry.total_seconds += seconds;
        true
    }

    /// Records a stem digest; `false` if it was already counted.
    pub fn mark_counted(&mut self, digest: &str) -> bool {
        self.counted_stems.insert(digest.to_string())
    }
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
