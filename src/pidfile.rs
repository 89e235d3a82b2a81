//! PID file management: write on daemonization, remove on clean shutdown.

use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("failed to write pid file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub fn write(path: &Path, pid: u32) -> Result<(), PidFileError> {
    tracing::info!(path = %path.display(), pid, "recording pid file");
    fs::write(path, format!("{pid}\n")).map_err(|source| PidFileError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Best-effort removal; a failure here is logged, not fatal, since it happens during shutdown.
pub fn remove(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::error!(path = %path.display(), error = %err, "failed to remove pid file");
        }
    }
}
