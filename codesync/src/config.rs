//! Server configuration.
//!
//! Values come from the environment first; `serve` flags override them.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::flush::DEFAULT_QUIESCENCE_WINDOW;

/// Base directory for defaults under the user's home.
const DATA_DIR: &str = ".codesync";
const DEFAULT_PORT: u16 = 3001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Local working trees, one directory per session.
    pub work_root: PathBuf,
    /// Root of the directory-backed object store.
    pub store_root: PathBuf,
    pub quiescence_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(env::temp_dir)
            .join(DATA_DIR);
        Self {
            port: DEFAULT_PORT,
            work_root: data_dir.join("workspaces"),
            store_root: data_dir.join("store"),
            quiescence_window: DEFAULT_QUIESCENCE_WINDOW,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unparsable values fall back
    /// to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: lookup("CODESYNC_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            work_root: lookup("CODESYNC_WORK_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_root),
            store_root: lookup("CODESYNC_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_root),
            quiescence_window: lookup("CODESYNC_QUIESCENCE_MS")
                .and_then(|ms| ms.parse().ok())
                .map_or(defaults.quiescence_window, Duration::from_millis),
        }
    }

    /// Apply explicit overrides, typically from CLI flags.
    #[must_use]
    pub fn with_overrides(
        mut self,
        port: Option<u16>,
        work_root: Option<PathBuf>,
        store_root: Option<PathBuf>,
        quiescence_ms: Option<u64>,
    ) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(work_root) = work_root {
            self.work_root = work_root;
        }
        if let Some(store_root) = store_root {
            self.store_root = store_root;
        }
        if let Some(ms) = quiescence_ms {
            self.quiescence_window = Duration::from_millis(ms);
        }
        self
    }
}
