//! Single-slot storage for the synthesized reply clip.
//!
//! The pipeline keeps exactly one reply clip on disk: every turn's
//! [`persist`] writes to the same fixed path, overwriting the previous
//! turn's audio.  The controller guarantees the old clip's playback handle
//! is stopped before the overwrite happens.
//!
//! [`persist`]: ClipStore::persist

use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Local write failures while persisting a clip.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not create audio directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not write audio clip {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// ClipStore
// ---------------------------------------------------------------------------

/// Fixed-path store for the one live reply clip.
#[derive(Debug, Clone)]
pub struct ClipStore {
    path: PathBuf,
}

impl ClipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The slot path clips are written to.
    pub fn clip_path(&self) -> &Path {
        &self.path
    }

    /// Write `bytes` to the slot, creating parent directories as needed.
    ///
    /// Returns the clip path for the playback stage.
    pub fn persist(&self, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(&self.path, bytes).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        log::debug!(
            "audio: wrote {} byte clip to {}",
            bytes.len(),
            self.path.display()
        );
        Ok(self.path.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
