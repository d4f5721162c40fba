//! Per-slot clip storage
//!
//! Every slot owns one deterministic file, `segment_{index:04}.{ext}`. A file
//! found there on a later run is reused instead of calling the synthesis
//! service again.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::AudioBuffer;

/// Directory of synthesized clips keyed by slot index
#[derive(Debug, Clone)]
pub struct ClipCache {
    /// Directory holding the clips
    dir: PathBuf,
    /// Extension of stored clips
    extension: String,
}

impl ClipCache {
    /// Open (and create if needed) the clip directory
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            extension: extension.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic path of a slot's clip
    pub fn path_for(&self, slot_index: usize) -> PathBuf {
        self.dir
            .join(format!("segment_{:04}.{}", slot_index, self.extension))
    }

    /// Duration of a stored, decodable clip.
    ///
    /// An undecodable leftover (e.g. from an interrupted run) is deleted.
    pub fn lookup(&self, slot_index: usize) -> Option<(PathBuf, u64)> {
        let path = self.path_for(slot_index);
        if !path.exists() {
            return None;
        }

        match AudioBuffer::decode_file(&path) {
            Ok(buffer) if !buffer.is_empty() => Some((path, buffer.span_ms())),
            Ok(_) | Err(_) => {
                log::warn!("Discarding unusable cached clip {}", path.display());
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Store encoded audio for a slot and return its path.
    ///
    /// Data lands in a sibling file first so a crash never leaves a
    /// truncated clip at the deterministic path.
    pub fn store(&self, slot_index: usize, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(slot_index);
        let partial = path.with_extension(format!("{}.part", self.extension));
        fs::write(&partial, data)?;
        fs::rename(&partial, &path)?;
        Ok(path)
    }

    /// Remove a slot's clip
    pub fn remove(&self, slot_index: usize) -> Result<()> {
        let path = self.path_for(slot_index);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ClipCache::new(dir.path().join("clips"), "wav").unwrap();
        assert!(cache.dir().exists());
        assert_eq!(
            cache.path_for(7),
            dir.path().join("clips").join("segment_0007.wav")
        );
        assert_eq!(
            cache.path_for(12345).file_name().unwrap(),
            "segment_12345.wav"
        );
    }

    #[test]
    fn test_lookup_reuses_valid_clip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ClipCache::new(dir.path(), "wav").unwrap();
        assert!(cache.lookup(0).is_none());

        AudioBuffer::silence(250, 24_000, 1)
            .write_wav(&cache.path_for(0))
            .unwrap();
        let (path, duration) = cache.lookup(0).unwrap();
        assert_eq!(path, cache.path_for(0));
        assert_eq!(duration, 250);
    }

    #[test]
    fn test_lookup_discards_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ClipCache::new(dir.path(), "wav").unwrap();
        cache.store(3, b"definitely not audio").unwrap();
        assert!(cache.path_for(3).exists());

        assert!(cache.lookup(3).is_none());
        assert!(!cache.path_for(3).exists());
    }
}
