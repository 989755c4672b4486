//! JSON event protocol spoken over the WebSocket.
//!
//! Inbound frames: `{"event": "...", "id": 7, "data": ...}`. `id` is only
//! needed for commands that reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, SyncError};
use crate::models::{DirectoryEntry, EditOperation};

/// Raw inbound frame before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    data: Value,
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    FetchDir { dir: String },
    FetchContent { path: String },
    UpdateContent { path: String, ops: Vec<EditOperation> },
    RequestTerminal,
    TerminalData { data: String },
    Disconnect,
}

#[derive(Deserialize)]
struct DirPayload {
    dir: String,
}

#[derive(Deserialize)]
struct PathPayload {
    path: String,
}

#[derive(Deserialize)]
struct UpdatePayload {
    path: String,
    #[serde(default)]
    content: Vec<EditOperation>,
}

#[derive(Deserialize)]
struct TerminalPayload {
    data: String,
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not an event envelope at all.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Known event whose `data` does not fit it.
    #[error("invalid {event} payload: {source}")]
    Payload {
        event: String,
        id: Option<u64>,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown event {event:?}")]
    UnknownEvent { event: String, id: Option<u64> },
}

impl DecodeError {
    /// Request id of the rejected frame, when it had one.
    pub const fn id(&self) -> Option<u64> {
        match self {
            Self::Malformed(_) => None,
            Self::Payload { id, .. } | Self::UnknownEvent { id, .. } => *id,
        }
    }

    pub fn event(&self) -> Option<&str> {
        match self {
            Self::Malformed(_) => None,
            Self::Payload { event, .. } | Self::UnknownEvent { event, .. } => Some(event.as_str()),
        }
    }
}

/// Decode one text frame into its request id and command.
pub fn decode(frame: &str) -> Result<(Option<u64>, ClientCommand), DecodeError> {
    let Envelope { event, id, data } =
        serde_json::from_str(frame).map_err(DecodeError::Malformed)?;

    match command_from(&event, data) {
        Ok(Some(command)) => Ok((id, command)),
        Ok(None) => Err(DecodeError::UnknownEvent { event, id }),
        Err(source) => Err(DecodeError::Payload { event, id, source }),
    }
}

fn command_from(event: &str, data: Value) -> Result<Option<ClientCommand>, serde_json::Error> {
    let command = match event {
        // The directory may come bare or wrapped.
        "fetchDir" => ClientCommand::FetchDir {
            dir: match data {
                Value::String(dir) => dir,
                Value::Null => String::new(),
                other => serde_json::from_value::<DirPayload>(other)?.dir,
            },
        },
        "fetchContent" => ClientCommand::FetchContent {
            path: serde_json::from_value::<PathPayload>(data)?.path,
        },
        "updateContent" => {
            let payload: UpdatePayload = serde_json::from_value(data)?;
            ClientCommand::UpdateContent {
                path: payload.path,
                ops: payload.content,
            }
        }
        "requestTerminal" => ClientCommand::RequestTerminal,
        "terminalData" => ClientCommand::TerminalData {
            data: serde_json::from_value::<TerminalPayload>(data)?.data,
        },
        "disconnect" => ClientCommand::Disconnect,
        _ => return Ok(None),
    };
    Ok(Some(command))
}

/// Error details carried in replies and error events.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SyncError> for ErrorBody {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedData {
    pub root_content: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
    pub command: String,
    #[serde(flatten)]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminalChunk {
    pub data: Vec<u8>,
}

/// Outbound events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Session ready; carries the root listing.
    Loaded { data: LoadedData },
    /// Answer to a command that carried an `id`.
    Reply {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Failure of a command that has no reply channel.
    Error { data: CommandError },
    /// Terminal output.
    Terminal { data: TerminalChunk },
}

impl ServerEvent {
    pub fn loaded(root_content: Vec<DirectoryEntry>) -> Self {
        Self::Loaded {
            data: LoadedData { root_content },
        }
    }

    pub fn reply<T: Serialize>(id: u64, result: Result<T, &SyncError>) -> Self {
        match result.map(|value| serde_json::to_value(value)) {
            Ok(Ok(value)) => Self::Reply {
                id,
                result: Some(value),
                error: None,
            },
            Ok(Err(e)) => Self::Reply {
                id,
                result: None,
                error: Some(ErrorBody {
                    kind: ErrorKind::IoFailure,
                    message: e.to_string(),
                }),
            },
            Err(err) => Self::Reply {
                id,
                result: None,
                error: Some(err.into()),
            },
        }
    }

    pub fn command_error(command: &str, err: &SyncError) -> Self {
        Self::Error {
            data: CommandError {
                command: command.to_string(),
                error: err.into(),
            },
        }
    }

    pub const fn terminal(data: Vec<u8>) -> Self {
        Self::Terminal {
            data: TerminalChunk { data },
        }
    }
}
