//! Flat-directory persistence for rooms.
//!
//! Each room is one file named after the room, holding the raw buffer text
//! with no framing. The directory is created on the first save.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Errors from reading or writing room files.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to create store directory {}: {}", .0.display(), .1)]
    CreateDir(PathBuf, io::Error),
    #[error("Failed to write {}: {}", .0.display(), .1)]
    Write(PathBuf, io::Error),
    #[error("Failed to read {}: {}", .0.display(), .1)]
    Read(PathBuf, io::Error),
}

/// Room files under a single directory.
#[derive(Debug, Clone)]
pub struct RoomStorage {
    root: PathBuf,
}

impl RoomStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `room`.
    pub fn path_for(&self, room: &str) -> PathBuf {
        self.root.join(room)
    }

    /// Write `content` as the room's file.
    ///
    /// Empty content is skipped unless `force_empty` is set. Returns whether
    /// a file was written.
    pub fn save(&self, room: &str, content: &str, force_empty: bool) -> Result<bool, StorageError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)
                .map_err(|e| StorageError::CreateDir(self.root.clone(), e))?;
        }

        if content.is_empty() && !force_empty {
            return Ok(false);
        }

        let path = self.path_for(room);
        fs::write(&path, content).map_err(|e| StorageError::Write(path, e))?;
        Ok(true)
    }

    /// Read a room's persisted content, if any.
    pub fn load(&self, room: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(room);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read(path, e)),
        }
    }
}
