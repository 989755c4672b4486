//! CLI command execution.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::Config;
use crate::edit;
use crate::models::EditOperation;
use crate::server;

use super::args::{Cli, Commands};

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            port,
            work_root,
            store_root,
            quiescence_ms,
        } => {
            let config =
                Config::from_env().with_overrides(port, work_root, store_root, quiescence_ms);
            server::start_server(config).await
        }
        Commands::Apply { file, ops, dry_run } => apply_file(&file, &ops, dry_run).await,
    }
}

/// Apply the batch in `ops_path` to `file`.
///
/// An unsupported operation still leaves the applied prefix in the output;
/// the error is returned after writing it.
async fn apply_file(file: &Path, ops_path: &Path, dry_run: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let raw = tokio::fs::read_to_string(ops_path)
        .await
        .with_context(|| format!("Failed to read {}", ops_path.display()))?;
    let ops: Vec<EditOperation> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid edit batch in {}", ops_path.display()))?;

    let (output, rejected) = match edit::apply(&text, &ops) {
        Ok(output) => (output, None),
        Err(partial) => (partial.text.clone(), Some(partial)),
    };

    if dry_run {
        println!("{output}");
    } else {
        tokio::fs::write(file, &output)
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }

    if let Some(partial) = rejected {
        warn!(position = partial.position, kind = %partial.kind, "batch stopped early");
        return Err(partial).context("Edit batch only partially applied");
    }
    Ok(())
}
