//! Error types for sheetsync-sync.

use thiserror::Error;

use sheetsync_core::ColumnName;

/// Errors surfaced by the sync engine to its callers.
///
/// Inbound callers get these synchronously; the poll loop logs them and
/// retries on the next tick.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed inbound payload. Not retryable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Column evolution failed in a way that blocks the write.
    #[error("schema error: {0}")]
    Schema(#[source] StoreError),

    /// The upsert statement itself failed.
    #[error("write error: {0}")]
    Write(#[source] StoreError),

    /// Connectivity failure to either system; the poller self-heals next tick.
    #[error("transient I/O error: {0}")]
    TransientIo(String),
}

impl SyncError {
    /// Stable machine-readable kind, carried over the daemon protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::Schema(_) => "schema_error",
            SyncError::Write(_) => "write_error",
            SyncError::TransientIo(_) => "transient_io",
        }
    }
}

/// Errors from a [`crate::Datastore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The datastore cannot be reached (pool exhausted, file locked, etc.).
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// `add_column` lost a race: the column is already there.
    #[error("column `{0}` already exists")]
    ColumnExists(ColumnName),

    /// Any other statement failure.
    #[error("datastore query failed: {0}")]
    Query(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// `true` for failures that say nothing about the statement itself.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

/// Errors from a [`crate::SheetClient`] implementation.
#[derive(Debug, Error)]
pub enum SheetError {
    /// Network or transport failure.
    #[error("spreadsheet unavailable: {0}")]
    Unavailable(String),

    /// The API answered with a non-success status.
    #[error("spreadsheet API rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The API answered with a body we could not understand.
    #[error("malformed spreadsheet response: {0}")]
    Malformed(String),

    /// No bearer token available.
    #[error("missing spreadsheet access token (set ${0})")]
    MissingToken(String),
}
