//! Data models for workspace sessions.

mod edit;
mod entry;
mod session;

pub use edit::{EditKind, EditOperation};
pub use entry::{DirectoryEntry, EntryKind};
pub use session::{object_key_for, remote_key_for, Session};
