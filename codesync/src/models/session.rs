//! Session model representing one mirrored workspace.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{SyncError, SyncResult};

/// Prefix under which every workspace lives in the object store.
pub const REMOTE_PREFIX: &str = "code";

/// A session identifies one workspace and the places it is mirrored to.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque identifier supplied by the client.
    pub id: String,
    /// Local working tree for this session.
    pub local_root: PathBuf,
    /// Object-store prefix holding the durable copy.
    pub remote_key: String,
    /// When the connection opened this session.
    pub connected_at: DateTime<Utc>,
}

impl Session {
    /// Create a session rooted under `work_root`.
    ///
    /// The id ends up as a path component, so anything that is not a plain
    /// single segment is rejected along with the empty id.
    pub fn new(id: &str, work_root: &Path) -> SyncResult<Self> {
        validate_session_id(id)?;
        Ok(Self {
            id: id.to_string(),
            local_root: work_root.join(id),
            remote_key: remote_key_for(id),
            connected_at: Utc::now(),
        })
    }
}

/// Remote prefix for a session id.
pub fn remote_key_for(session_id: &str) -> String {
    format!("{REMOTE_PREFIX}/{session_id}")
}

/// Remote key for one file of a session.
pub fn object_key_for(session_id: &str, file_path: &str) -> String {
    format!(
        "{}/{}",
        remote_key_for(session_id),
        file_path.trim_start_matches('/')
    )
}

fn validate_session_id(id: &str) -> SyncResult<()> {
    let trimmed = id.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || id.contains(['/', '\\', '\0'])
    {
        return Err(SyncError::InvalidSession(id.to_string()));
    }
    Ok(())
}
