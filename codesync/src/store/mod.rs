//! Durable object store boundary.
//!
//! The engine only needs two capabilities from the store: mirror a prefix
//! into a local directory, and put one object.

mod dir;
#[cfg(test)]
mod memory;

use std::path::Path;

use async_trait::async_trait;

use crate::error::SyncResult;

pub use dir::DirStore;
#[cfg(test)]
pub use memory::MemoryStore;

/// Remote store client.
///
/// Failures are reported as `SyncError::Transfer`. Retry policy, if any,
/// belongs to the implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Copy every object under `remote_key` into `local_dir`, keeping the
    /// key suffix as the relative path.
    async fn mirror_tree(&self, remote_key: &str, local_dir: &Path) -> SyncResult<()>;

    /// Store `bytes` under `remote_key`, replacing any previous object.
    async fn put_object(&self, remote_key: &str, bytes: &[u8]) -> SyncResult<()>;
}
