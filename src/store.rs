//! File-backed session documents, one pretty-printed JSON file per song.
//!
//! The files are the only shared state. Every load-modify-save cycle holds the
//! song's async mutex, and every save goes through a temporary file that is
//! renamed into place, so readers see either the old or the new document.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::document::{MixState, SessionDocument, TrackKey, TrackRecord};
use crate::error::{PeerError, Result};
use crate::merge::{LastWriteWins, MergeOutcome, MergeStrategy};
use crate::paths::SongId;

#[derive(Debug)]
pub struct SessionStore {
    sessions_dir: PathBuf,
    strategy: Arc<dyn MergeStrategy>,
    locks: Mutex<HashMap<SongId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self::with_strategy(sessions_dir, Arc::new(LastWriteWins))
    }

    pub fn with_strategy(
        sessions_dir: impl Into<PathBuf>,
        strategy: Arc<dyn MergeStrategy>,
    ) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            strategy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the sessions directory if needed.
    pub async fn open(sessions_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(sessions_dir);
        tokio::fs::create_dir_all(&store.sessions_dir).await.map_err(|e| {
            PeerError::storage(format!(
                "cannot create {}: {}",
                store.sessions_dir.display(),
                e
            ))
        })?;
        Ok(store)
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn strategy(&self) -> &dyn MergeStrategy {
        self.strategy.as_ref()
    }

    pub fn document_path(&self, song: &SongId) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", song.as_str()))
    }

    /// Exclusive access to `song`'s document for one load-modify-save cycle.
    ///
    /// Mutexes nobody holds or waits on are dropped here, so the map only
    /// tracks songs with a cycle in flight.
    pub async fn song_lock(&self, song: &SongId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(song.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Returns the stored document, or an empty one if the song is unknown.
    pub async fn load(&self, song: &SongId) -> Result<SessionDocument> {
        let path = self.document_path(song);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SessionDocument::default()),
            Err(e) => {
                return Err(PeerError::storage(format!("cannot read {}: {}", path.display(), e)))
            }
        };

        serde_json::from_slice(&raw).map_err(|e| {
            PeerError::storage(format!("corrupt session document {}: {}", path.display(), e))
        })
    }

    /// Replaces the stored document atomically.
    pub async fn save(&self, song: &SongId, document: &SessionDocument) -> Result<()> {
        let path = self.document_path(song);
        let tmp_path = self
            .sessions_dir
            .join(format!(".{}.{}.tmp", song.as_str(), Uuid::new_v4()));

        let json = serde_json::to_vec_pretty(document)?;
        if let Err(e) = write_then_rename(&tmp_path, &path, &json).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PeerError::storage(format!("cannot save {}: {}", path.display(), e)));
        }

        debug!("Saved session {} ({} tracks)", song, document.tracks.len());
        Ok(())
    }

    /// Merges one track's mix state into the song and persists it.
    pub async fn upsert_track(
        &self,
        song: &SongId,
        key: TrackKey,
        track_name: &str,
        mix: MixState,
    ) -> Result<MergeOutcome> {
        let _guard = self.song_lock(song).await;

        let mut document = self.load(song).await?;
        let incoming = TrackRecord::new(
            song.as_str(),
            key,
            track_name,
            mix,
            Local::now().naive_local(),
        );
        let outcome = self.strategy.merge(&mut document.tracks, incoming);
        self.save(song, &document).await?;

        Ok(outcome)
    }

    /// Adds recorded seconds to a user's total. Non-positive amounts are a no-op
    /// and do not touch the file.
    pub async fn add_contribution(
        &self,
        song: &SongId,
        user_id: &str,
        seconds: f64,
    ) -> Result<bool> {
        self.credit_stem(song, user_id, seconds, None).await
    }

    /// Like `add_contribution`, but skips the credit when `digest` was already
    /// counted for this song.
    pub async fn credit_stem(
        &self,
        song: &SongId,
        user_id: &str,
        seconds: f64,
        digest: Option<&str>,
    ) -> Result<bool> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Ok(false);
        }

        let _guard = self.song_lock(song).await;

        let mut document = self.load(song).await?;
        if let Some(digest) = digest {
            if !document.mark_counted(digest) {
                info!("Stem {} already counted for {}, not crediting {}", digest, song, user_id);
                return Ok(false);
            }
        }
        document.credit(user_id, seconds);
        self.save(song, &document).await?;

        Ok(true)
    }
}

async fn write_then_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use tempfile::TempDir;

    fn song(raw: &str) -> SongId {
        SongId::parse(raw).unwrap()
    }

    fn mix(volume: f64) -> MixState {
        MixState {
            volume,
            pan: -0.2,
            mute: 0.0,
            solo: 0.0,
        }
    }

    async fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path().join("sessions")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn load_unknown_song_is_empty() {
        let (_dir, store) = store().await;
        let doc = store.load(&song("never-seen")).await.unwrap();
        assert!(doc.tracks.is_empty());
        assert!(doc.contributions.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_leaves_no_temp_files() {
        let (_dir, store) = store().await;
        let s1 = song("S1");
        let mut doc = SessionDocument::default();
        doc.credit("u1", 4.0);
        store.save(&s1, &doc).await.unwrap();

        assert_eq!(store.load(&s1).await.unwrap(), doc);

        let names: Vec<_> = std::fs::read_dir(store.sessions_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["S1.json"]);
    }

    #[tokio::test]
    async fn corrupt_document_is_a_storage_error() {
        let (_dir, store) = store().await;
        let s1 = song("S1");
        std::fs::write(store.document_path(&s1), b"{ not json").unwrap();

        assert!(matches!(store.load(&s1).await, Err(PeerError::Storage(_))));
    }

    #[tokio::test]
    async fn upsert_appends_then_replaces() {
        let (_dir, store) = store().await;
        let s1 = song("S1");

        let guitar = || TrackKey::new("Guitar", "u1");

        let first = store.upsert_track(&s1, guitar(), "Gtr", mix(0.8)).await.unwrap();
        let second = store
            .upsert_track(&s1, TrackKey::new("Bass", "u1"), "Bs", mix(0.5))
            .await
            .unwrap();
        let third = store.upsert_track(&s1, guitar(), "Gtr 2", mix(0.3)).await.unwrap();

        assert_eq!(first, MergeOutcome::Appended);
        assert_eq!(second, MergeOutcome::Appended);
        assert_eq!(third, MergeOutcome::Replaced { index: 0 });

        let doc = store.load(&s1).await.unwrap();
        assert_eq!(doc.tracks.len(), 2);
        assert_eq!(doc.tracks[0].track_name, "Gtr 2");
        assert_eq!(doc.tracks[0].volume, 0.3);
        assert_eq!(doc.tracks[0].song_folder, "S1");
        assert_eq!(doc.tracks[1].common_track, "Bass");
    }

    #[tokio::test]
    async fn non_positive_contribution_does_not_create_a_document() {
        let (_dir, store) = store().await;
        let s1 = song("S1");

        assert!(!store.add_contribution(&s1, "u1", 0.0).await.unwrap());
        assert!(!store.add_contribution(&s1, "u1", -3.0).await.unwrap());
        assert!(!store.document_path(&s1).exists());
    }

    #[tokio::test]
    async fn contributions_sum_exactly() {
        let (_dir, store) = store().await;
        let s1 = song("S1");
        for seconds in [1.5, 2.25, 10.0] {
            store.add_contribution(&s1, "u1", seconds).await.unwrap();
        }
        store.add_contribution(&s1, "u2", 7.0).await.unwrap();

        let doc = store.load(&s1).await.unwrap();
        assert_eq!(doc.total_seconds("u1"), 13.75);
        assert_eq!(doc.total_seconds("u2"), 7.0);
    }

    #[tokio::test]
    async fn repeated_digest_is_credited_once() {
        let (_dir, store) = store().await;
        let s1 = song("S1");

        assert!(store.credit_stem(&s1, "u1", 10.0, Some("abc")).await.unwrap());
        assert!(!store.credit_stem(&s1, "u1", 10.0, Some("abc")).await.unwrap());
        assert!(store.credit_stem(&s1, "u1", 5.0, Some("def")).await.unwrap());

        assert_eq!(store.load(&s1).await.unwrap().total_seconds("u1"), 15.0);
    }

    #[tokio::test]
    async fn idle_song_locks_are_released() {
        let (_dir, store) = store().await;
        for i in 0..10 {
            store.add_contribution(&song(&format!("Song {}", i)), "u1", 1.0).await.unwrap();
        }

        let held = store.song_lock(&song("Held")).await;
        assert_eq!(store.locks.lock().unwrap().len(), 1);

        let _other = store.song_lock(&song("Other")).await;
        assert_eq!(store.locks.lock().unwrap().len(), 2);

        drop(held);
        let _again = store.song_lock(&song("Song 3")).await;
        let locks = store.locks.lock().unwrap();
        assert_eq!(locks.len(), 2);
        assert!(locks.contains_key(&song("Other")));
        assert!(locks.contains_key(&song("Song 3")));
    }

    #[tokio::test]
    async fn concurrent_cycles_on_one_song_lose_no_updates() {
        let (_dir, store) = store().await;
        let store = Arc::new(store);
        let s1 = song("S1");

        let credits = (0..25).map(|_| {
            let store = store.clone();
            let s1 = s1.clone();
            tokio::spawn(async move { store.add_contribution(&s1, "u1", 2.0).await })
        });
        let upserts = (0..25).map(|i| {
            let store = store.clone();
            let s1 = s1.clone();
            tokio::spawn(async move {
                store
                    .upsert_track(&s1, TrackKey::new(format!("Track {}", i), "u1"), "t", mix(0.5))
                    .await
                    .map(|_| true)
            })
        });

        for result in join_all(credits.chain(upserts)).await {
            result.unwrap().unwrap();
        }

        let doc = store.load(&s1).await.unwrap();
        assert_eq!(doc.total_seconds("u1"), 50.0);
        assert_eq!(doc.tracks.len(), 25);
    }
}
