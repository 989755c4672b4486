//! Terminal multiplexer boundary.
//!
//! One interactive shell per connection. Output flows into a registered sink
//! the multiplexer holds; clearing a connection kills its shell and drops the
//! sink.

mod pty;

use std::path::Path;

use tokio::sync::mpsc;

use crate::error::SyncResult;

pub use pty::{PtyMultiplexer, ShellOptions};

/// Receives raw terminal output chunks.
pub type OutputSink = mpsc::Sender<Vec<u8>>;

/// Per-connection terminal sessions.
pub trait TerminalMultiplexer: Send + Sync {
    /// Start a shell for `connection_id` in `cwd`, replacing any previous one.
    fn create_session(
        &self,
        connection_id: &str,
        session_id: &str,
        cwd: &Path,
        sink: OutputSink,
    ) -> SyncResult<()>;

    /// Send input bytes to the connection's shell.
    fn write(&self, connection_id: &str, data: &[u8]) -> SyncResult<()>;

    /// Kill the connection's shell, if any.
    fn clear(&self, connection_id: &str);
}
