//! Line-indexed edit operations.

use serde::{Deserialize, Serialize};

/// What an edit operation does to its line.
///
/// Unknown kinds still deserialize so that a batch can be applied up to the
/// first operation the engine does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    /// Insert a new line before `index`.
    Insert,
    /// Replace the line at `index`.
    Update,
    /// Remove the line at `index`.
    Delete,
    #[serde(untagged)]
    Other(String),
}

impl EditKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(kind) => kind,
        }
    }
}

impl std::fmt::Display for EditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One mutation against a file's line sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(rename = "type")]
    pub kind: EditKind,
    /// Line position, read against the sequence as already mutated by the
    /// earlier operations of the same batch.
    #[serde(rename = "index")]
    pub line_index: usize,
    #[serde(default)]
    pub value: String,
}

impl EditOperation {
    pub fn insert(line_index: usize, value: impl Into<String>) -> Self {
        Self {
            kind: EditKind::Insert,
            line_index,
            value: value.into(),
        }
    }

    pub fn update(line_index: usize, value: impl Into<String>) -> Self {
        Self {
            kind: EditKind::Update,
            line_index,
            value: value.into(),
        }
    }

    pub const fn delete(line_index: usize) -> Self {
        Self {
            kind: EditKind::Delete,
            line_index,
            value: String::new(),
        }
    }
}
