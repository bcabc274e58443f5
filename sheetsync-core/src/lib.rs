//! sheetsync core library: domain types, field-name sanitization, config
//! persistence, errors.
//!
//! Public API surface:
//! - [`types`]: row ids, column names, scalar field values, records
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save / init of `~/.sheetsync/config.yaml`

pub mod config;
pub mod error;
pub mod types;

pub use config::SyncConfig;
pub use error::ConfigError;
pub use types::{
    sanitize_field_name, ColumnName, FieldValue, Record, RowId, ROW_ID_COLUMN, UPDATED_AT_COLUMN,
};
