//! Object store backed by a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::workspace::confined_join;

use super::RemoteStore;

/// Store where key `a/b/c` is the file `<root>/a/b/c`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> SyncResult<PathBuf> {
        confined_join(&self.root, key).map_err(|e| SyncError::transfer(key, e))
    }
}

#[async_trait]
impl RemoteStore for DirStore {
    async fn mirror_tree(&self, remote_key: &str, local_dir: &Path) -> SyncResult<()> {
        let source = self.object_path(remote_key)?;
        let transfer = |e: std::io::Error| SyncError::transfer(remote_key, e);

        tokio::fs::create_dir_all(local_dir).await.map_err(transfer)?;

        // An empty prefix lists no objects; that is an empty workspace.
        if !tokio::fs::try_exists(&source).await.map_err(transfer)? {
            debug!(remote_key, "mirror source missing, starting empty");
            return Ok(());
        }

        let mut pending = vec![(source, local_dir.to_path_buf())];
        let mut copied = 0usize;
        while let Some((from, to)) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&from).await.map_err(transfer)?;
            while let Some(entry) = reader.next_entry().await.map_err(transfer)? {
                let target = to.join(entry.file_name());
                if entry.file_type().await.map_err(transfer)?.is_dir() {
                    tokio::fs::create_dir_all(&target).await.map_err(transfer)?;
                    pending.push((entry.path(), target));
                } else {
                    tokio::fs::copy(entry.path(), &target)
                        .await
                        .map_err(transfer)?;
                    copied += 1;
                }
            }
        }

        debug!(remote_key, copied, "mirrored tree");
        Ok(())
    }

    async fn put_object(&self, remote_key: &str, bytes: &[u8]) -> SyncResult<()> {
        let path = self.object_path(remote_key)?;
        let transfer = |e: std::io::Error| SyncError::transfer(remote_key, e);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(transfer)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(transfer)
    }
}
