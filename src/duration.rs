use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;

use crate::error::{PeerError, Result};

/// Computes how many seconds of audio a stored blob holds.
pub trait DurationProbe: Send + Sync {
    fn duration_seconds(&self, path: &Path) -> Result<f64>;
}

/// WAV blobs are measured from their frame count with hound; anything else
/// goes through lofty, which reports whole milliseconds. The file extension
/// is only a hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioProbe;

impl DurationProbe for AudioProbe {
    fn duration_seconds(&self, path: &Path) -> Result<f64> {
        if let Some(seconds) = wav_seconds(path) {
            return Ok(seconds);
        }

        let probe = Probe::open(path)
            .map_err(|e| PeerError::Decode(format!("cannot open {}: {}", path.display(), e)))?
            .guess_file_type()
            .map_err(|e| PeerError::Decode(format!("cannot sniff {}: {}", path.display(), e)))?;

        if probe.file_type().is_none() {
            return Err(PeerError::Decode(format!(
                "{} is not a recognised audio file",
                path.display()
            )));
        }

        let tagged_file = probe.read()?;
        Ok(tagged_file.properties().duration().as_secs_f64())
    }
}

/// Exact `frames / sample_rate`, or `None` if `path` is not a readable WAV.
fn wav_seconds(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }
    Some(f64::from(reader.duration()) / f64::from(sample_rate))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Mono 16-bit PCM WAV of silence.
    pub(crate) fn wav_bytes(seconds: u32, sample_rate: u32) -> Vec<u8> {
        wav_frames(seconds * sample_rate, sample_rate)
    }

    pub(crate) fn wav_frames(frames: u32, sample_rate: u32) -> Vec<u8> {
        let data_len = frames * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // channels
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
        out.extend_from_slice(&2u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(44 + data_len as usize, 0);
        out
    }

    #[test]
    fn reads_wav_duration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, wav_bytes(10, 8000)).unwrap();

        let seconds = AudioProbe.duration_seconds(&path).unwrap();
        assert!((seconds - 10.0).abs() < 1e-3, "got {}", seconds);
    }

    #[test]
    fn wav_duration_keeps_sub_millisecond_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, wav_frames(8001, 8000)).unwrap();

        let seconds = AudioProbe.duration_seconds(&path).unwrap();
        assert!((seconds - 1.000125).abs() < 1e-9, "got {}", seconds);
    }

    #[test]
    fn extension_is_not_required() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, wav_bytes(3, 8000)).unwrap();

        let seconds = AudioProbe.duration_seconds(&path).unwrap();
        assert!((seconds - 3.0).abs() < 1e-3, "got {}", seconds);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let result = AudioProbe.duration_seconds(&path);
        assert!(matches!(result, Err(PeerError::Decode(_))), "{:?}", result);
    }
}
