//! Per-connection command routing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::edit;
use crate::error::{SyncError, SyncResult};
use crate::flush::WriteBackScheduler;
use crate::models::{DirectoryEntry, EditOperation, Session};
use crate::store::RemoteStore;
use crate::terminal::{OutputSink, TerminalMultiplexer};
use crate::workspace::LocalTree;

use super::locks::FileLocks;
use super::registry::{SessionRegistry, SessionSlot};

/// Process-wide collaborators shared by every connection.
pub struct SyncContext {
    /// Directory holding one mirrored tree per session.
    pub work_root: PathBuf,
    pub store: Arc<dyn RemoteStore>,
    pub scheduler: WriteBackScheduler,
    pub terminals: Arc<dyn TerminalMultiplexer>,
    pub file_locks: FileLocks,
    pub sessions: SessionRegistry,
}

impl SyncContext {
    pub fn new(
        work_root: impl Into<PathBuf>,
        store: Arc<dyn RemoteStore>,
        scheduler: WriteBackScheduler,
        terminals: Arc<dyn TerminalMultiplexer>,
    ) -> Self {
        Self {
            work_root: work_root.into(),
            store,
            scheduler,
            terminals,
            file_locks: FileLocks::new(),
            sessions: SessionRegistry::new(),
        }
    }
}

/// Routes the commands of one connection to its session.
pub struct SessionRouter {
    connection_id: String,
    session: Session,
    tree: LocalTree,
    ctx: Arc<SyncContext>,
    slot: Arc<SessionSlot>,
    closing: AtomicBool,
}

impl SessionRouter {
    /// Open a session: validate the id, mirror the remote tree and list its
    /// root.
    ///
    /// Nothing is created for an invalid id. A failed mirror fails the
    /// connection since there is no usable local copy. While another
    /// connection is attached or a write-back of the session is outstanding,
    /// the local tree is newer than the remote one and is reused as is.
    pub async fn connect(
        ctx: Arc<SyncContext>,
        connection_id: impl Into<String>,
        session_id: Option<&str>,
    ) -> SyncResult<(Self, Vec<DirectoryEntry>)> {
        let connection_id = connection_id.into();
        let session = Session::new(session_id.unwrap_or_default(), &ctx.work_root)?;
        let tree = LocalTree::new(&session.local_root);
        let slot = ctx.sessions.slot(&session.id);

        let root = match open_tree(&ctx, &session, &tree, &slot).await {
            Ok(root) => root,
            Err(e) => {
                drop(slot);
                ctx.sessions.prune(&session.id);
                return Err(e);
            }
        };
        info!(
            connection = %connection_id,
            session = %session.id,
            entries = root.len(),
            connections = slot.live(),
            "session connected"
        );

        Ok((
            Self {
                connection_id,
                session,
                tree,
                ctx,
                slot,
                closing: AtomicBool::new(false),
            },
            root,
        ))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub async fn fetch_dir(&self, dir: &str) -> SyncResult<Vec<DirectoryEntry>> {
        debug!(session = %self.session.id, dir, "fetchDir");
        self.tree.list_dir(dir).await
    }

    pub async fn fetch_content(&self, path: &str) -> SyncResult<String> {
        debug!(session = %self.session.id, path, "fetchContent");
        self.tree.read_file(path).await
    }

    /// Apply an edit batch to a file and schedule its write-back.
    ///
    /// The file is read once, the whole batch applied, and the result written
    /// back before the flush is scheduled with that exact text. If the batch
    /// hits an unsupported operation the applied prefix is still written and
    /// flushed, then the error is returned.
    pub async fn update_content(&self, path: &str, ops: &[EditOperation]) -> SyncResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        if self.closing.load(Ordering::SeqCst) {
            warn!(session = %self.session.id, path, "edit after disconnect ignored");
            return Ok(());
        }

        let full_path = self.tree.resolve(path)?;
        let _guard = self.ctx.file_locks.acquire(&full_path).await;

        let original = self.tree.read_file(path).await?;
        let (text, rejected) = match edit::apply(&original, ops) {
            Ok(text) => (text, None),
            Err(partial) => {
                let text = partial.text.clone();
                (text, Some(SyncError::from(partial)))
            }
        };

        self.tree.write_file(path, &text).await?;
        self.ctx.scheduler.schedule(&self.session.id, path, text);
        debug!(session = %self.session.id, path, ops = ops.len(), "updateContent applied");

        rejected.map_or(Ok(()), Err)
    }

    /// Start this connection's terminal, streaming output into `sink`.
    pub fn request_terminal(&self, sink: OutputSink) -> SyncResult<()> {
        self.ctx.terminals.create_session(
            &self.connection_id,
            &self.session.id,
            &self.session.local_root,
            sink,
        )
    }

    pub fn terminal_data(&self, data: &[u8]) -> SyncResult<()> {
        self.ctx.terminals.write(&self.connection_id, data)
    }

    /// Kill this connection's terminal.
    pub fn close_terminal(&self) {
        self.ctx.terminals.clear(&self.connection_id);
    }

    /// Tear down the connection. Already scheduled flushes still run; no new
    /// ones are scheduled by this router. The last connection out retires
    /// the local tree once the session's write-backs are done.
    pub fn disconnect(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_terminal();
        let remaining = self.slot.detach();
        let connected_for = Utc::now() - self.session.connected_at;
        info!(
            connection = %self.connection_id,
            session = %self.session.id,
            seconds = connected_for.num_seconds(),
            remaining,
            "session disconnected"
        );

        if remaining == 0 {
            tokio::spawn(retire_tree(
                Arc::clone(&self.ctx),
                self.session.clone(),
                Arc::clone(&self.slot),
            ));
        }
    }
}

/// Mirror the session in unless its local tree is still live, then list the
/// root and attach.
async fn open_tree(
    ctx: &SyncContext,
    session: &Session,
    tree: &LocalTree,
    slot: &SessionSlot,
) -> SyncResult<Vec<DirectoryEntry>> {
    let _gate = slot.lock().await;

    let live = slot.live() > 0 || ctx.scheduler.has_session_work(&session.id);
    let present = tokio::fs::try_exists(&session.local_root)
        .await
        .unwrap_or(false);
    if live && present {
        debug!(session = %session.id, "reusing local tree");
    } else {
        ctx.store
            .mirror_tree(&session.remote_key, &session.local_root)
            .await?;
    }

    let root = tree.list_dir("").await?;
    slot.attach();
    Ok(root)
}

/// Remove a session's local tree once nothing is attached or unflushed.
async fn retire_tree(ctx: Arc<SyncContext>, session: Session, slot: Arc<SessionSlot>) {
    loop {
        ctx.scheduler.settle_session(&session.id).await;

        let _gate = slot.lock().await;
        if slot.live() > 0 {
            break;
        }
        if ctx.scheduler.has_session_work(&session.id) {
            continue;
        }
        match tokio::fs::remove_dir_all(&session.local_root).await {
            Ok(()) => info!(session = %session.id, "local tree retired"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(session = %session.id, error = %e, "failed to remove local tree"),
        }
        break;
    }

    drop(slot);
    ctx.sessions.prune(&session.id);
}
