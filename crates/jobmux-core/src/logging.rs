//! Logging init: `tracing` to a file under the XDG state dir, or to stderr.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,jobmux=debug,jobmux_core=debug";

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Append to this file (parent directories are created).
    File(PathBuf),
    Stderr,
}

/// `RUST_LOG` if set, otherwise the crate default.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Default log file: `~/.local/state/jobmux/jobmux.log`.
pub fn default_log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("jobmux")?;
    Ok(xdg_dirs.get_state_home().join("jobmux.log"))
}

/// Shared append-only log file; each event takes its own handle.
struct SharedFile(Arc<fs::File>);

impl<'a> MakeWriter<'a> for SharedFile {
    type Writer = &'a fs::File;

    fn make_writer(&'a self) -> Self::Writer {
        &self.0
    }
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("create log dir {}", dir.display()))?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Install the global subscriber for `target`. Fails if the file cannot be opened
/// or a subscriber is already installed.
pub fn init(target: LogTarget) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false);
    match target {
        LogTarget::File(path) => {
            let file = open_log_file(&path)?;
            builder
                .with_writer(SharedFile(Arc::new(file)))
                .try_init()
                .map_err(|e| anyhow::anyhow!("install subscriber: {}", e))?;
            tracing::info!("jobmux logging initialized at {}", path.display());
        }
        LogTarget::Stderr => {
            builder
                .with_writer(io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("install subscriber: {}", e))?;
        }
    }
    Ok(())
}

/// Log to the default file; fall back to stderr when the state dir is unusable.
pub fn init_logging() -> Result<()> {
    match default_log_path().and_then(|p| open_log_file(&p).map(|_| p)) {
        Ok(path) => init(LogTarget::File(path)),
        Err(e) => {
            init(LogTarget::Stderr)?;
            tracing::warn!("log file unavailable ({:#}); logging to stderr", e);
            Ok(())
        }
    }
}
