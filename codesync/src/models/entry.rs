//! Directory listing entries sent to the editor.

use serde::{Deserialize, Serialize};

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Directory,
}

/// One entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub name: String,
    /// Location relative to the listed base, for display only.
    pub path: String,
}

impl DirectoryEntry {
    pub fn new(kind: EntryKind, name: impl Into<String>, base: &str) -> Self {
        let name = name.into();
        Self {
            kind,
            path: format!("{base}/{name}"),
            name,
        }
    }
}
