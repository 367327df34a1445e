//! Raw audio blobs, grouped by song under `stems/<song_id>/`.
//!
//! Uploads are first streamed into `incoming/` and only moved under `stems/`
//! once complete, so an aborted transfer never shows up as a stored stem.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{PeerError, Result};
use crate::paths::{SongId, StemLocator, StemName};

#[derive(Debug, Clone)]
pub struct StemStore {
    root: PathBuf,
    staging: PathBuf,
}

impl StemStore {
    pub fn new(root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: staging.into(),
        }
    }

    pub async fn open(root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root, staging);
        for dir in [&store.root, &store.staging] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PeerError::storage(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(store)
    }

    pub fn resolve(&self, locator: &StemLocator) -> PathBuf {
        self.root
            .join(locator.song().as_str())
            .join(locator.name().as_str())
    }

    /// Starts a new upload in the staging area.
    pub async fn stage(&self) -> Result<StagedStem> {
        let tmp_path = self.staging.join(format!("{}.part", Uuid::new_v4()));
        let file = tokio::fs::File::create(&tmp_path).await.map_err(|e| {
            PeerError::storage(format!("cannot create {}: {}", tmp_path.display(), e))
        })?;

        Ok(StagedStem {
            file: Some(file),
            tmp_path: Some(tmp_path),
            hasher: md5::Context::new(),
            len: 0,
        })
    }

    /// Moves a finished upload to its final place, replacing any stem of the same name.
    pub async fn commit(
        &self,
        mut staged: StagedStem,
        song: &SongId,
        name: &StemName,
    ) -> Result<CommittedStem> {
        let mut file = staged
            .file
            .take()
            .ok_or_else(|| PeerError::storage("staged stem already consumed"))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let song_dir = self.root.join(song.as_str());
        tokio::fs::create_dir_all(&song_dir).await.map_err(|e| {
            PeerError::storage(format!("cannot create {}: {}", song_dir.display(), e))
        })?;

        let locator = StemLocator::new(song.clone(), name.clone());
        let path = self.resolve(&locator);
        let tmp_path = staged
            .tmp_path
            .as_deref()
            .ok_or_else(|| PeerError::storage("staged stem already consumed"))?;
        tokio::fs::rename(tmp_path, &path).await.map_err(|e| {
            PeerError::storage(format!("cannot store {}: {}", path.display(), e))
        })?;
        staged.tmp_path = None;

        let hasher = std::mem::replace(&mut staged.hasher, md5::Context::new());
        let digest = format!("{:x}", hasher.compute());
        debug!("Stored stem {} ({} bytes, md5 {})", locator, staged.len, digest);

        Ok(CommittedStem {
            locator,
            path,
            len: staged.len,
            digest,
        })
    }
}

/// An upload in progress. Dropping it without committing removes the partial file.
pub struct StagedStem {
    file: Option<tokio::fs::File>,
    tmp_path: Option<PathBuf>,
    hasher: md5::Context,
    len: u64,
}

impl StagedStem {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| PeerError::storage("staged stem already consumed"))?;
        file.write_all(chunk).await?;
        self.hasher.consume(chunk);
        self.len += chunk.len() as u64;
        Ok(())
    }

    pub fn tmp_path(&self) -> Option<&Path> {
        self.tmp_path.as_deref()
    }
}

impl Drop for StagedStem {
    fn drop(&mut self) {
        drop(self.file.take());
        if let Some(tmp_path) = self.tmp_path.take() {
            if let Err(e) = std::fs::remove_file(&tmp_path) {
                warn!("Could not discard partial upload {}: {}", tmp_path.display(), e);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommittedStem {
    pub locator: StemLocator,
    pub path: PathBuf,
    pub len: u64,
    pub digest: String,
}
