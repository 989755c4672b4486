//! codesync - Workspace synchronization for a browser-based code editor.
//!
//! Mirrors each session's workspace from an object store into a local tree,
//! applies line edits streamed over a WebSocket, and flushes edited files
//! back once edit activity settles.
//!
//! Architecture:
//! - `edit` is a pure line-edit engine
//! - `flush` debounces write-back per (session, file)
//! - `session` routes one connection's commands
//! - `server` exposes the WebSocket protocol

mod cli;
mod config;
mod edit;
mod error;
mod flush;
mod models;
mod server;
mod session;
mod store;
mod terminal;
mod workspace;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    execute(cli).await
}
