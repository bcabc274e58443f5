use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] sheetsync_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] sheetsync_sync::SyncError),

    #[error("datastore error: {0}")]
    Store(#[from] sheetsync_sync::StoreError),

    #[error("spreadsheet error: {0}")]
    Sheet(#[from] sheetsync_sync::SheetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with a typed failure, e.g. an inbound record it
    /// refused. `kind` is the stable sync error kind.
    #[error("{kind}: {message}")]
    Rejected { kind: String, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
