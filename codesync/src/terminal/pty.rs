//! PTY-backed shells.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

use super::{OutputSink, TerminalMultiplexer};

/// How shells are launched.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// The program to execute.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: HashMap<String, String>,

    /// Initial terminal size.
    pub rows: u16,
    pub cols: u16,

    /// Read buffer size for output chunks.
    pub buffer_size: usize,
}

impl ShellOptions {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            rows: 24,
            cols: 80,
            buffer_size: 4096,
        }
    }

    /// `$SHELL`, falling back to bash.
    pub fn from_env() -> Self {
        let program = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        Self::new(program).env("TERM", "xterm-256color")
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self, cwd: &Path, session_id: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.cwd(cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env("CODESYNC_SESSION", session_id);
        cmd
    }
}

/// A live shell attached to one connection.
struct PtyTerminal {
    session_id: String,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    // Keeps the PTY open for the reader thread.
    _master: Box<dyn MasterPty + Send>,
}

/// Terminal multiplexer spawning one PTY shell per connection.
pub struct PtyMultiplexer {
    options: ShellOptions,
    terminals: Mutex<HashMap<String, PtyTerminal>>,
}

impl PtyMultiplexer {
    pub fn new(options: ShellOptions) -> Self {
        Self {
            options,
            terminals: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PtyTerminal>> {
        self.terminals
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of live shells.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn(&self, session_id: &str, cwd: &Path, sink: OutputSink) -> anyhow::Result<PtyTerminal> {
        let pair = native_pty_system().openpty(PtySize {
            rows: self.options.rows,
            cols: self.options.cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let child = pair
            .slave
            .spawn_command(self.options.command(cwd, session_id))?;
        // The child holds its own copy; ours would keep the reader from seeing EOF.
        drop(pair.slave);

        let reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;
        spawn_reader(reader, sink, self.options.buffer_size, cwd.to_path_buf());

        Ok(PtyTerminal {
            session_id: session_id.to_string(),
            writer,
            child,
            _master: pair.master,
        })
    }
}

impl Default for PtyMultiplexer {
    fn default() -> Self {
        Self::new(ShellOptions::from_env())
    }
}

/// Forward PTY output to the sink until EOF or the sink is dropped.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    sink: OutputSink,
    buffer_size: usize,
    cwd: PathBuf,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; buffer_size.max(1)];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if sink.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(cwd = %cwd.display(), error = %e, "terminal reader stopped");
                    break;
                }
            }
        }
    });
}

fn kill(mut terminal: PtyTerminal) {
    let _ = terminal.child.kill();
    tokio::task::spawn_blocking(move || {
        let _ = terminal.child.wait();
    });
}

impl TerminalMultiplexer for PtyMultiplexer {
    fn create_session(
        &self,
        connection_id: &str,
        session_id: &str,
        cwd: &Path,
        sink: OutputSink,
    ) -> SyncResult<()> {
        let terminal = self
            .spawn(session_id, cwd, sink)
            .map_err(|e| SyncError::Terminal(format!("failed to start shell: {e}")))?;

        let previous = self.lock().insert(connection_id.to_string(), terminal);
        if let Some(previous) = previous {
            warn!(connection = connection_id, "replacing existing terminal");
            kill(previous);
        }
        info!(connection = connection_id, session = session_id, "terminal started");
        Ok(())
    }

    fn write(&self, connection_id: &str, data: &[u8]) -> SyncResult<()> {
        let mut terminals = self.lock();
        let terminal = terminals
            .get_mut(connection_id)
            .ok_or_else(|| SyncError::Terminal("no terminal for connection".to_string()))?;
        terminal
            .writer
            .write_all(data)
            .and_then(|()| terminal.writer.flush())
            .map_err(|e| SyncError::Terminal(e.to_string()))
    }

    fn clear(&self, connection_id: &str) {
        let removed = self.lock().remove(connection_id);
        if let Some(terminal) = removed {
            info!(connection = connection_id, session = %terminal.session_id, "terminal cleared");
            kill(terminal);
        }
    }
}
