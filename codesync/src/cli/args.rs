//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// codesync - Mirror workspaces locally, apply live edits, flush them back
#[derive(Parser, Debug)]
#[command(name = "codesync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workspace sync server
    Serve {
        /// Port to listen on [env: CODESYNC_PORT, default 3001]
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding mirrored session trees [env: CODESYNC_WORK_ROOT]
        #[arg(long)]
        work_root: Option<PathBuf>,

        /// Root of the directory-backed object store [env: CODESYNC_STORE_ROOT]
        #[arg(long)]
        store_root: Option<PathBuf>,

        /// Quiet period before edits are flushed, in milliseconds [env: CODESYNC_QUIESCENCE_MS]
        #[arg(long)]
        quiescence_ms: Option<u64>,
    },

    /// Apply a JSON edit batch to a local file
    Apply {
        /// File to edit in place
        file: PathBuf,

        /// JSON array of edit operations
        ops: PathBuf,

        /// Print the result instead of writing the file
        #[arg(long)]
        dry_run: bool,
    },
}
