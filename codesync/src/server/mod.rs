//! codesync server.
//!
//! Endpoints:
//! - GET /health - Liveness probe
//! - WS /ws?roomId=<id> - Editor session (`sessionId` is accepted as well)
//!
//! Each WebSocket connection gets its own `SessionRouter`. Edits of one
//! connection go through a queue so they apply in arrival order. Reads run as
//! independent tasks once the edits received before them have landed.

mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SyncError;
use crate::flush::WriteBackScheduler;
use crate::models::EditOperation;
use crate::session::{SessionRouter, SyncContext};
use crate::store::DirStore;
use crate::terminal::PtyMultiplexer;

pub use protocol::{decode, ClientCommand, DecodeError, ServerEvent};

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Work for a connection's edit queue.
enum Queued {
    Edit {
        path: String,
        ops: Vec<EditOperation>,
    },
    /// Released once every edit queued before it has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Query parameters of the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl ConnectParams {
    fn session_id(&self) -> Option<&str> {
        self.room_id.as_deref().or(self.session_id.as_deref())
    }
}

/// Build the HTTP application for a context.
pub fn app(ctx: Arc<SyncContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Start the server and run until Ctrl-C, then drain pending flushes.
pub async fn start_server(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.work_root).with_context(|| {
        format!("Failed to create work root {}", config.work_root.display())
    })?;
    std::fs::create_dir_all(&config.store_root).with_context(|| {
        format!("Failed to create store root {}", config.store_root.display())
    })?;

    let store = Arc::new(DirStore::new(&config.store_root));
    let scheduler = WriteBackScheduler::new(store.clone(), config.quiescence_window);
    let ctx = Arc::new(SyncContext::new(
        &config.work_root,
        store,
        scheduler.clone(),
        Arc::new(PtyMultiplexer::default()),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        %addr,
        work_root = %config.work_root.display(),
        store_root = %config.store_root.display(),
        quiescence_ms = config.quiescence_window.as_millis(),
        "codesync server starting"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.drain().await;
    info!("codesync server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// === Handlers ===

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(ctx): State<Arc<SyncContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, ctx, params))
}

async fn handle_websocket(socket: WebSocket, ctx: Arc<SyncContext>, params: ConnectParams) {
    let connection_id = Uuid::now_v7().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let router = match SessionRouter::connect(ctx, connection_id.clone(), params.session_id()).await
    {
        Ok((router, root)) => {
            let loaded = ServerEvent::loaded(root);
            if send_event(&mut ws_tx, &loaded).await.is_err() {
                router.disconnect();
                return;
            }
            Arc::new(router)
        }
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "connection rejected");
            let code = if e.is_fatal() {
                close_code::POLICY
            } else {
                close_code::ERROR
            };
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            if send_event(&mut ws_tx, &event).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let (edit_tx, edit_rx) = mpsc::unbounded_channel();
    let edits = tokio::spawn(run_edit_queue(router.clone(), edit_rx, out_tx.clone()));

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let keep_open = dispatch(&router, text.as_str(), &out_tx, &edit_tx);
                if !keep_open {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "socket error");
                break;
            }
        }
    }

    // Terminal goes first; queued edits still land and schedule their flushes.
    router.close_terminal();
    drop(edit_tx);
    let _ = edits.await;
    router.disconnect();

    drop(out_tx);
    let _ = writer.await;
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            error!(error = %e, "failed to encode event");
            Ok(())
        }
    }
}

/// Handle one inbound frame. Returns `false` when the connection should close.
fn dispatch(
    router: &Arc<SessionRouter>,
    frame: &str,
    out_tx: &mpsc::Sender<ServerEvent>,
    edit_tx: &mpsc::UnboundedSender<Queued>,
) -> bool {
    let (id, command) = match decode(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            reject(router, &e, out_tx);
            return true;
        }
    };

    match command {
        ClientCommand::FetchDir { dir } => {
            let settled = barrier(edit_tx);
            let router = router.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let _ = settled.await;
                let result = router.fetch_dir(&dir).await;
                reply(&router, "fetchDir", id, result, &out_tx).await;
            });
        }
        ClientCommand::FetchContent { path } => {
            let settled = barrier(edit_tx);
            let router = router.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let _ = settled.await;
                let result = router.fetch_content(&path).await;
                reply(&router, "fetchContent", id, result, &out_tx).await;
            });
        }
        ClientCommand::UpdateContent { path, ops } => {
            let _ = edit_tx.send(Queued::Edit { path, ops });
        }
        ClientCommand::RequestTerminal => {
            let (term_tx, mut term_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_BUFFER);
            match router.request_terminal(term_tx) {
                Ok(()) => {
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        while let Some(chunk) = term_rx.recv().await {
                            if out_tx.send(ServerEvent::terminal(chunk)).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => report(router, "requestTerminal", &e, out_tx),
            }
        }
        ClientCommand::TerminalData { data } => {
            if let Err(e) = router.terminal_data(data.as_bytes()) {
                report(router, "terminalData", &e, out_tx);
            }
        }
        ClientCommand::Disconnect => return false,
    }
    true
}

/// Resolves once the edits queued so far are applied, or the queue is gone.
fn barrier(edit_tx: &mpsc::UnboundedSender<Queued>) -> oneshot::Receiver<()> {
    let (done_tx, done_rx) = oneshot::channel();
    let _ = edit_tx.send(Queued::Barrier(done_tx));
    done_rx
}

/// Apply this connection's edits one batch at a time, in arrival order.
async fn run_edit_queue(
    router: Arc<SessionRouter>,
    mut edit_rx: mpsc::UnboundedReceiver<Queued>,
    out_tx: mpsc::Sender<ServerEvent>,
) {
    while let Some(item) = edit_rx.recv().await {
        match item {
            Queued::Edit { path, ops } => {
                if let Err(e) = router.update_content(&path, &ops).await {
                    warn!(
                        session = %router.session().id,
                        path = %path,
                        error = %e,
                        "updateContent failed"
                    );
                    let _ = out_tx
                        .send(ServerEvent::command_error("updateContent", &e))
                        .await;
                }
            }
            Queued::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Answer a frame that could not be decoded on whatever channel it names.
fn reject(router: &SessionRouter, err: &DecodeError, out_tx: &mpsc::Sender<ServerEvent>) {
    warn!(connection = router.connection_id(), error = %err, "rejecting frame");
    let error = SyncError::BadRequest(err.to_string());
    let event = match (err.id(), err.event()) {
        (Some(id), _) => ServerEvent::reply::<()>(id, Err(&error)),
        (None, Some(command)) => ServerEvent::command_error(command, &error),
        (None, None) => return,
    };
    let _ = out_tx.try_send(event);
}

async fn reply<T: serde::Serialize>(
    router: &SessionRouter,
    command: &'static str,
    id: Option<u64>,
    result: Result<T, SyncError>,
    out_tx: &mpsc::Sender<ServerEvent>,
) {
    if let Err(e) = &result {
        warn!(session = %router.session().id, command, error = %e, "command failed");
    }
    match id {
        Some(id) => {
            let _ = out_tx.send(ServerEvent::reply(id, result.as_ref())).await;
        }
        None => debug!(command, "no reply id, dropping result"),
    }
}

/// Report from a synchronous path; dropped if the outbound queue is full.
fn report(
    router: &SessionRouter,
    command: &'static str,
    err: &SyncError,
    out_tx: &mpsc::Sender<ServerEvent>,
) {
    warn!(session = %router.session().id, command, error = %err, "command failed");
    let _ = out_tx.try_send(ServerEvent::command_error(command, err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::ShellOptions;
    use std::time::Duration;

    #[test]
    fn test_room_id_takes_precedence() {
        let params = ConnectParams {
            room_id: Some("room".into()),
            session_id: Some("session".into()),
        };
        assert_eq!(params.session_id(), Some("room"));

        let params = ConnectParams {
            room_id: None,
            session_id: Some("session".into()),
        };
        assert_eq!(params.session_id(), Some("session"));
        assert_eq!(ConnectParams::default().session_id(), None);
    }

    struct Connected {
        _work: tempfile::TempDir,
        store_root: tempfile::TempDir,
        scheduler: WriteBackScheduler,
        router: Arc<SessionRouter>,
    }

    async fn connected() -> Connected {
        let work = tempfile::tempdir().unwrap();
        let store_root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(store_root.path().join("code/abc")).unwrap();
        std::fs::write(store_root.path().join("code/abc/main.txt"), "a\nb").unwrap();

        let store = Arc::new(DirStore::new(store_root.path()));
        let scheduler = WriteBackScheduler::new(store.clone(), Duration::from_millis(50));
        let ctx = Arc::new(SyncContext::new(
            work.path(),
            store,
            scheduler.clone(),
            Arc::new(PtyMultiplexer::new(ShellOptions::new("/bin/sh"))),
        ));
        let (router, _) = SessionRouter::connect(ctx, "c", Some("abc")).await.unwrap();
        Connected {
            _work: work,
            store_root,
            scheduler,
            router: Arc::new(router),
        }
    }

    fn edit(path: &str, ops: Vec<EditOperation>) -> Queued {
        Queued::Edit {
            path: path.to_string(),
            ops,
        }
    }

    #[tokio::test]
    async fn test_edit_queue_reports_failures() {
        let conn = connected().await;

        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (edit_tx, edit_rx) = mpsc::unbounded_channel();
        let queue = tokio::spawn(run_edit_queue(conn.router.clone(), edit_rx, out_tx));

        edit_tx
            .send(edit("main.txt", vec![EditOperation::update(1, "B")]))
            .unwrap();
        edit_tx
            .send(edit("gone.txt", vec![EditOperation::update(0, "x")]))
            .unwrap();
        drop(edit_tx);
        queue.await.unwrap();

        let event = serde_json::to_value(out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["data"]["command"], "updateContent");
        assert_eq!(event["data"]["kind"], "notFound");

        conn.scheduler.drain().await;
        assert_eq!(
            std::fs::read_to_string(conn.store_root.path().join("code/abc/main.txt")).unwrap(),
            "a\nB"
        );
    }

    #[tokio::test]
    async fn test_edit_failures_wait_for_a_full_outbound_queue() {
        let conn = connected().await;

        let (out_tx, mut out_rx) = mpsc::channel(1);
        out_tx
            .send(ServerEvent::terminal(b"busy".to_vec()))
            .await
            .unwrap();
        let (edit_tx, edit_rx) = mpsc::unbounded_channel();
        let queue = tokio::spawn(run_edit_queue(conn.router.clone(), edit_rx, out_tx));

        for path in ["one.txt", "two.txt"] {
            edit_tx
                .send(edit(path, vec![EditOperation::delete(0)]))
                .unwrap();
        }
        drop(edit_tx);

        let mut kinds = Vec::new();
        while let Some(event) = out_rx.recv().await {
            let event = serde_json::to_value(event).unwrap();
            kinds.push(event["event"].as_str().unwrap().to_string());
        }
        queue.await.unwrap();
        assert_eq!(kinds, vec!["terminal", "error", "error"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fetch_after_update_sees_the_edit() {
        let conn = connected().await;

        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (edit_tx, edit_rx) = mpsc::unbounded_channel();
        let queue = tokio::spawn(run_edit_queue(conn.router.clone(), edit_rx, out_tx.clone()));

        for round in 0..50u64 {
            let update = serde_json::json!({
                "event": "updateContent",
                "data": {
                    "path": "main.txt",
                    "content": [{"type": "update", "index": 0, "value": format!("hello{round}")}],
                },
            });
            let fetch = serde_json::json!({
                "event": "fetchContent",
                "id": round,
                "data": {"path": "main.txt"},
            });
            assert!(dispatch(&conn.router, &update.to_string(), &out_tx, &edit_tx));
            assert!(dispatch(&conn.router, &fetch.to_string(), &out_tx, &edit_tx));

            let reply = serde_json::to_value(out_rx.recv().await.unwrap()).unwrap();
            assert_eq!(reply["id"], round);
            assert_eq!(reply["result"], format!("hello{round}\nb"));
        }

        drop(edit_tx);
        queue.await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_answered() {
        let conn = connected().await;
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (edit_tx, _edit_rx) = mpsc::unbounded_channel();

        let frames = [
            r#"{"event":"fetchContent","id":5,"data":{}}"#,
            r#"{"event":"updateContent","data":{"path":"main.txt","content":[{"type":"update","index":-1}]}}"#,
            r#"{"event":"rename","id":6,"data":{}}"#,
            "not json",
        ];
        for frame in frames {
            assert!(dispatch(&conn.router, frame, &out_tx, &edit_tx));
        }
        drop(out_tx);

        let mut events = Vec::new();
        while let Some(event) = out_rx.recv().await {
            events.push(serde_json::to_value(event).unwrap());
        }
        assert_eq!(events.len(), 3);

        assert_eq!(events[0]["event"], "reply");
        assert_eq!(events[0]["id"], 5);
        assert_eq!(events[0]["error"]["kind"], "badRequest");

        assert_eq!(events[1]["event"], "error");
        assert_eq!(events[1]["data"]["command"], "updateContent");
        assert_eq!(events[1]["data"]["kind"], "badRequest");

        assert_eq!(events[2]["id"], 6);
        assert_eq!(
            std::fs::read_to_string(conn.router.session().local_root.join("main.txt")).unwrap(),
            "a\nb"
        );
    }
}
