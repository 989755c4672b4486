//! Error taxonomy shared by the sync engine.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by workspace commands.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or malformed session identifier. Fatal to the connection.
    #[error("invalid session id: {0:?}")]
    InvalidSession(String),

    /// Requested path does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Local read/write failure.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote mirror or put failure.
    #[error("transfer failed for {key}: {message}")]
    Transfer { key: String, message: String },

    /// An edit batch contained an operation kind the engine does not know.
    #[error("unsupported edit operation {kind:?} at position {position}")]
    UnsupportedOperation { kind: String, position: usize },

    /// A client path tried to leave the session root.
    #[error("path escapes workspace root: {0}")]
    PathEscape(String),

    /// Terminal multiplexer failure.
    #[error("terminal error: {0}")]
    Terminal(String),

    /// A command frame that could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Stable machine-readable error kinds sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidSession,
    NotFound,
    IoFailure,
    TransferError,
    UnsupportedOperation,
    PathEscape,
    Terminal,
    BadRequest,
}

impl SyncError {
    /// Map an `std::io::Error` for `path` onto `NotFound` or `Io`.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn transfer(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transfer {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSession(_) => ErrorKind::InvalidSession,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::Transfer { .. } => ErrorKind::TransferError,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::PathEscape(_) => ErrorKind::PathEscape,
            Self::Terminal(_) => ErrorKind::Terminal,
            Self::BadRequest(_) => ErrorKind::BadRequest,
        }
    }

    /// Whether this error must terminate the connection.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidSession(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_not_found() {
        let err = SyncError::from_io(
            "a.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = SyncError::from_io(
            "a.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_error_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedOperation).unwrap();
        assert_eq!(json, "\"unsupportedOperation\"");
        assert_eq!(
            serde_json::to_string(&SyncError::BadRequest("x".into()).kind()).unwrap(),
            "\"badRequest\""
        );
        assert!(SyncError::InvalidSession(String::new()).is_fatal());
        assert!(!SyncError::PathEscape("..".into()).is_fatal());
    }
}
