//! The table side of the sync: the [`Datastore`] collaborator and the values
//! that cross it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use sheetsync_core::{ColumnName, RowId};

use crate::error::StoreError;

/// One table row as read back for the outbound direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub row_id: RowId,
    /// Column name → stored text. Reserved columns are excluded.
    pub values: BTreeMap<String, Option<String>>,
    pub modified_at: DateTime<Utc>,
}

/// A fully resolved insert-or-update for one row.
///
/// Every column in `fields` is known to exist; values are already textual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertPlan {
    pub row_id: RowId,
    pub fields: Vec<(ColumnName, Option<String>)>,
}

impl UpsertPlan {
    pub fn columns(&self) -> impl Iterator<Item = &ColumnName> {
        self.fields.iter().map(|(column, _)| column)
    }
}

/// The relational table the engine writes into and polls.
///
/// Implementations provide their own transactional guarantees; the engine
/// holds no locks around these calls.
pub trait Datastore: Send + Sync {
    /// Every column currently in the table, reserved ones included.
    fn list_columns(&self) -> Result<Vec<ColumnName>, StoreError>;

    /// Add a nullable text column.
    ///
    /// Must return [`StoreError::ColumnExists`] when the column is already
    /// present.
    fn add_column(&self, name: &ColumnName) -> Result<(), StoreError>;

    /// Insert the row, or overwrite exactly the planned columns if a row with
    /// that id exists. Must bump the row's modification time.
    fn upsert(&self, plan: &UpsertPlan) -> Result<(), StoreError>;

    /// Rows whose modification time is strictly after `since`.
    fn select_modified_since(&self, since: DateTime<Utc>) -> Result<Vec<Row>, StoreError>;
}
