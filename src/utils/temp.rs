//! Scoped temporary artifacts
//!
//! Checkpoints and intermediate mixes live in one temporary directory that is
//! removed when the manager is dropped, whichever way the run ends.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

/// Owner of a run's temporary directory
pub struct TempFileManager {
    temp_dir: Option<TempDir>,
    cleanup: bool,
}

impl TempFileManager {
    /// Create a fresh directory; with `cleanup == false` it survives the run
    pub fn new(cleanup: bool) -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("dub-sync-").tempdir()?;
        log::debug!("Temporary directory: {}", temp_dir.path().display());

        Ok(Self {
            temp_dir: Some(temp_dir),
            cleanup,
        })
    }

    /// Path of the temporary directory
    pub fn temp_dir_path(&self) -> &Path {
        self.temp_dir
            .as_ref()
            .map(|dir| dir.path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Reserve a unique file name in the directory (the file is not created)
    pub fn create_temp_file(&self, prefix: &str, extension: &str) -> PathBuf {
        let file_name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4(), extension);
        self.temp_dir_path().join(file_name)
    }

    /// Create a named subdirectory
    pub fn create_subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.temp_dir_path().join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        if let Some(dir) = self.temp_dir.take() {
            if self.cleanup {
                if let Err(e) = dir.close() {
                    log::warn!("Failed to remove temporary directory: {}", e);
                }
            } else {
                let kept = dir.into_path();
                log::info!("Keeping temporary files in {}", kept.display());
            }
        }
    }
}
