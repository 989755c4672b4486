//! Confined path joining for client-supplied relative paths.

use std::path::{Component, Path, PathBuf};

use crate::error::{SyncError, SyncResult};

/// Join a client path onto `root`, refusing anything that could leave it.
///
/// A leading `/` is accepted and ignored since listed entries carry paths of
/// the form `/dir/name`. `.` segments are dropped; `..`, drive prefixes and
/// NUL bytes are rejected.
pub fn confined_join(root: &Path, relative: &str) -> SyncResult<PathBuf> {
    if relative.contains('\0') {
        return Err(SyncError::PathEscape(relative.to_string()));
    }

    let mut joined = root.to_path_buf();
    for component in Path::new(relative.trim_start_matches(['/', '\\'])).components() {
        match component {
            Component::Normal(segment) => joined.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::PathEscape(relative.to_string()));
            }
        }
    }
    Ok(joined)
}
