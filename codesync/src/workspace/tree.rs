//! Local tree accessor confined to one session root.

use std::path::PathBuf;

use crate::error::{SyncError, SyncResult};
use crate::models::{DirectoryEntry, EntryKind};

use super::path::confined_join;

/// Reads and writes files under a session's mirrored root.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a client path inside the root.
    pub fn resolve(&self, relative: &str) -> SyncResult<PathBuf> {
        confined_join(&self.root, relative)
    }

    /// List the directory at `dir`; each entry's `path` is `dir/name`.
    pub async fn list_dir(&self, dir: &str) -> SyncResult<Vec<DirectoryEntry>> {
        let path = self.resolve(dir)?;
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| SyncError::from_io(&path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SyncError::from_io(&path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SyncError::from_io(entry.path(), e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(DirectoryEntry::new(kind, name, dir));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Read a file's full text.
    pub async fn read_file(&self, relative: &str) -> SyncResult<String> {
        let path = self.resolve(relative)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SyncError::from_io(&path, e))
    }

    /// Replace a file's full text.
    pub async fn write_file(&self, relative: &str, text: &str) -> SyncResult<()> {
        let path = self.resolve(relative)?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| SyncError::from_io(&path, e))
    }
}
