//! Storage keys derived from untrusted peer input.
//!
//! Song identifiers and uploaded file names end up as single path segments
//! under the data directory. They are validated here and nowhere else, so a
//! `SongId` or `StemName` can be joined onto a directory without further checks.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{PeerError, Result};

/// Rejects anything that could escape the directory it is joined onto.
fn check_segment(kind: &str, raw: &str) -> Result<()> {
    if raw.trim().is_empty() {
        return Err(PeerError::validation(format!("{} must not be empty", kind)));
    }
    if raw == "." || raw.contains("..") {
        return Err(PeerError::validation(format!(
            "{} contains a path traversal sequence: {:?}",
            kind, raw
        )));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(PeerError::validation(format!(
            "{} contains a path separator: {:?}",
            kind, raw
        )));
    }
    if raw.chars().any(|c| c.is_control()) {
        return Err(PeerError::validation(format!(
            "{} contains control characters",
            kind
        )));
    }
    // Windows drive prefix, e.g. "C:evil.wav"
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(PeerError::validation(format!(
            "{} must not be an absolute path: {:?}",
            kind, raw
        )));
    }
    Ok(())
}

/// Folder-style song identifier, safe to use as a file stem and directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongId(String);

impl SongId {
    pub fn parse(raw: &str) -> Result<Self> {
        check_segment("song_folder", raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File name of a stored stem inside its song directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemName(String);

impl StemName {
    /// Accepts a client-supplied file name verbatim or rejects it.
    pub fn parse(raw: &str) -> Result<Self> {
        check_segment("filename", raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Name used when the upload carried no file name:
    /// `<common_track>_<user_id>_<unix_seconds>.wav`, reduced to `[A-Za-z0-9._-]`.
    pub fn generated(common_track: &str, user_id: &str, unix_seconds: i64) -> Self {
        static UNSAFE: OnceLock<Regex> = OnceLock::new();
        let unsafe_chars =
            UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex"));

        let raw = format!("{}_{}_{}.wav", common_track, user_id, unix_seconds);
        let cleaned = unsafe_chars.replace_all(&raw, "_").replace("..", "_");
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque handle for a committed stem, `<song_id>/<file name>`.
///
/// Only `StemStore` turns a locator back into a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemLocator {
    song: SongId,
    name: StemName,
}

impl StemLocator {
    pub fn new(song: SongId, name: StemName) -> Self {
        Self { song, name }
    }

    pub fn song(&self) -> &SongId {
        &self.song
    }

    pub fn name(&self) -> &StemName {
        &self.name
    }
}

impl fmt::Display for StemLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.song.as_str(), self.name.as_str())
    }
}

impl Serialize for StemLocator {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
