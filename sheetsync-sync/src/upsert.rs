//! Upsert engine: the inbound (sheet → table) write path.
//!
//! 1. Validate the row id and record.
//! 2. Ensure a column exists for every field (schema adapter).
//! 3. Resolve fields to columns, dropping the ones without a column.
//! 4. Execute one insert-or-update keyed by the row id.
//! 5. Advance the watermark so the next poll skips this write.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use sheetsync_core::{sanitize_field_name, ColumnName, Record, RowId, ROW_ID_COLUMN};

use crate::error::SyncError;
use crate::schema::SchemaAdapter;
use crate::store::{Datastore, UpsertPlan};
use crate::watermark::{self, Watermark};

/// What an upsert did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub row_id: RowId,
    /// Columns written, in statement order.
    pub written: Vec<ColumnName>,
    /// Columns this upsert had to add first.
    pub created_columns: Vec<ColumnName>,
    /// Raw field names that were not written.
    pub dropped: Vec<String>,
}

pub struct UpsertEngine {
    store: Arc<dyn Datastore>,
    schema: SchemaAdapter,
    watermark: Arc<Watermark>,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn Datastore>, watermark: Arc<Watermark>) -> Self {
        Self {
            schema: SchemaAdapter::new(store.clone()),
            store,
            watermark,
        }
    }

    pub fn schema(&self) -> &SchemaAdapter {
        &self.schema
    }

    /// Insert or update `record` under `row_id`.
    ///
    /// Idempotent: repeating the call with the same arguments leaves the same
    /// stored row. Not retried on failure.
    pub fn upsert(&self, row_id: &RowId, record: &Record) -> Result<UpsertReport, SyncError> {
        if row_id.is_blank() {
            return Err(SyncError::InvalidInput("row_id must not be empty".to_string()));
        }
        if record.is_empty() {
            return Err(SyncError::InvalidInput(format!(
                "record for row {row_id} has no fields"
            )));
        }

        let schema = self
            .schema
            .ensure_columns(record.keys().map(String::as_str))?;
        let (plan, dropped) = build_plan(row_id, record, &schema.available);
        if !dropped.is_empty() {
            tracing::warn!(row_id = %row_id, dropped = ?dropped, "fields dropped from upsert");
        }

        self.store.upsert(&plan).map_err(SyncError::Write)?;
        self.watermark.advance(watermark::now());

        tracing::info!(
            row_id = %row_id,
            columns = plan.fields.len(),
            created = schema.created.len(),
            "upserted row from sheet",
        );
        Ok(UpsertReport {
            row_id: row_id.clone(),
            written: plan.columns().cloned().collect(),
            created_columns: schema.created,
            dropped,
        })
    }
}

/// Resolve a record against the available columns.
///
/// Fields whose names sanitize to the same column collapse to the last one in
/// key order. Returns the plan and the raw names left out of it.
pub(crate) fn build_plan(
    row_id: &RowId,
    record: &Record,
    available: &BTreeSet<ColumnName>,
) -> (UpsertPlan, Vec<String>) {
    let mut resolved: BTreeMap<ColumnName, Option<String>> = BTreeMap::new();
    let mut dropped = Vec::new();

    for (field, value) in record {
        if field == ROW_ID_COLUMN {
            dropped.push(field.clone());
            continue;
        }
        let column = sanitize_field_name(field);
        if !available.contains(&column) {
            dropped.push(field.clone());
            continue;
        }
        resolved.insert(column, value.to_text());
    }

    let plan = UpsertPlan {
        row_id: row_id.clone(),
        fields: resolved.into_iter().collect(),
    };
    (plan, dropped)
}
