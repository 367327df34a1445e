//! How an incoming track record is folded into a song's track list.

use std::fmt::Debug;

use crate::document::TrackRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No record with the same identity existed; the incoming one was appended.
    Appended,
    /// The record at `index` was overwritten in place.
    Replaced { index: usize },
}

pub trait MergeStrategy: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Folds `incoming` into `tracks`. Must keep at most one record per
    /// `(common_track, user_id)` and must not reorder existing records.
    fn merge(&self, tracks: &mut Vec<TrackRecord>, incoming: TrackRecord) -> MergeOutcome;
}

/// Whatever arrives last replaces the stored values. No clocks, no conflict detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl MergeStrategy for LastWriteWins {
    fn name(&self) -> &'static str {
        "last-write-wins"
    }

    fn merge(&self, tracks: &mut Vec<TrackRecord>, incoming: TrackRecord) -> MergeOutcome {
        let existing = tracks
            .iter()
            .position(|t| t.matches(&incoming.common_track, &incoming.user_id));

        match existing {
            Some(index) => {
                let track = &mut tracks[index];
                track.track_name = incoming.track_name;
                track.volume = incoming.volume;
                track.pan = incoming.pan;
                track.mute = incoming.mute;
                track.solo = incoming.solo;
                track.updated_at = incoming.updated_at;
                MergeOutcome::Replaced { index }
            }
            None => {
                tracks.push(incoming);
                MergeOutcome::Appended
            }
        }
    }
}
