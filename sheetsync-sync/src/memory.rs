//! In-memory [`Datastore`] and [`SheetClient`] with failure injection.
//!
//! Used by the engine, daemon and CLI tests; behaves like the SQLite store
//! for everything the engine can observe.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use sheetsync_core::{ColumnName, RowId, ROW_ID_COLUMN, UPDATED_AT_COLUMN};

use crate::error::{SheetError, StoreError};
use crate::sheet::SheetClient;
use crate::store::{Datastore, Row, UpsertPlan};
use crate::watermark;

// ---------------------------------------------------------------------------
// Datastore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredRow {
    values: BTreeMap<ColumnName, Option<String>>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Table {
    columns: Vec<ColumnName>,
    rows: BTreeMap<RowId, StoredRow>,
}

#[derive(Debug)]
pub struct MemoryDatastore {
    table: Mutex<Table>,
    rejected: Mutex<BTreeSet<String>>,
    unavailable: AtomicBool,
    failing_upserts: AtomicBool,
    list_calls: AtomicUsize,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatastore {
    /// Empty table with only the reserved columns.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                columns: vec![
                    ColumnName::from(ROW_ID_COLUMN),
                    ColumnName::from(UPDATED_AT_COLUMN),
                ],
                rows: BTreeMap::new(),
            }),
            rejected: Mutex::new(BTreeSet::new()),
            unavailable: AtomicBool::new(false),
            failing_upserts: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Make `add_column` fail for `name`, the way a reserved word would.
    pub fn reject_column(&self, name: &str) {
        lock(&self.rejected).insert(name.to_string());
    }

    /// Simulate a lost connection: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `upsert` fail with a query error.
    pub fn fail_upserts(&self, fail: bool) {
        self.failing_upserts.store(fail, Ordering::SeqCst);
    }

    /// Edit a cell directly, bypassing the sync engine, as another
    /// application writing to the table would.
    pub fn update_field(
        &self,
        row_id: &RowId,
        column: &str,
        value: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut table = lock(&self.table);
        let column = ColumnName::from(column);
        if !table.columns.contains(&column) {
            return Err(StoreError::Query(format!("no such column: {column}")));
        }
        let row = table
            .rows
            .get_mut(row_id)
            .ok_or_else(|| StoreError::Query(format!("no row {row_id}")))?;
        row.values.insert(column, value.map(str::to_string));
        row.modified_at = watermark::now();
        Ok(())
    }

    /// Stored values of one row, keyed by column name.
    pub fn row(&self, row_id: &RowId) -> Option<BTreeMap<String, Option<String>>> {
        let table = lock(&self.table);
        table.rows.get(row_id).map(|row| {
            row.values
                .iter()
                .map(|(column, value)| (column.0.clone(), value.clone()))
                .collect()
        })
    }

    pub fn modified_at(&self, row_id: &RowId) -> Option<DateTime<Utc>> {
        lock(&self.table).rows.get(row_id).map(|row| row.modified_at)
    }

    pub fn row_count(&self) -> usize {
        lock(&self.table).rows.len()
    }

    /// Columns in creation order, reserved ones first.
    pub fn columns(&self) -> Vec<ColumnName> {
        lock(&self.table).columns.clone()
    }

    /// Number of `list_columns` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory datastore offline".to_string()));
        }
        Ok(())
    }
}

impl Datastore for MemoryDatastore {
    fn list_columns(&self) -> Result<Vec<ColumnName>, StoreError> {
        self.check_available()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.table).columns.clone())
    }

    fn add_column(&self, name: &ColumnName) -> Result<(), StoreError> {
        self.check_available()?;
        if lock(&self.rejected).contains(name.as_str()) {
            return Err(StoreError::Query(format!(
                "near \"{name}\": syntax error"
            )));
        }
        let mut table = lock(&self.table);
        if table.columns.contains(name) {
            return Err(StoreError::ColumnExists(name.clone()));
        }
        table.columns.push(name.clone());
        Ok(())
    }

    fn upsert(&self, plan: &UpsertPlan) -> Result<(), StoreError> {
        self.check_available()?;
        if self.failing_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Query("constraint failed".to_string()));
        }
        let mut table = lock(&self.table);
        if let Some(unknown) = plan.columns().find(|c| !table.columns.contains(c)) {
            return Err(StoreError::Query(format!("no such column: {unknown}")));
        }
        let row = table
            .rows
            .entry(plan.row_id.clone())
            .or_insert_with(|| StoredRow {
                values: BTreeMap::new(),
                modified_at: watermark::now(),
            });
        for (column, value) in &plan.fields {
            row.values.insert(column.clone(), value.clone());
        }
        row.modified_at = watermark::now();
        Ok(())
    }

    fn select_modified_since(&self, since: DateTime<Utc>) -> Result<Vec<Row>, StoreError> {
        self.check_available()?;
        let table = lock(&self.table);
        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|(_, row)| row.modified_at > since)
            .map(|(row_id, row)| Row {
                row_id: row_id.clone(),
                values: row
                    .values
                    .iter()
                    .map(|(column, value)| (column.0.clone(), value.clone()))
                    .collect(),
                modified_at: row.modified_at,
            })
            .collect();
        rows.sort_by_key(|row| row.modified_at);
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Sheet
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySheet {
    header: Mutex<Vec<String>>,
    rows: Mutex<BTreeMap<u32, Vec<String>>>,
    writes: Mutex<Vec<(u32, Vec<String>)>>,
    failing_positions: Mutex<BTreeSet<u32>>,
    header_unavailable: AtomicBool,
    header_reads: AtomicUsize,
}

impl MemorySheet {
    pub fn with_header(header: &[&str]) -> Self {
        let sheet = Self::default();
        sheet.set_header(header);
        sheet
    }

    /// Replace the header row, as a user reordering columns would.
    pub fn set_header(&self, header: &[&str]) {
        *lock(&self.header) = header.iter().map(|h| h.to_string()).collect();
    }

    /// Make writes to `position` fail.
    pub fn fail_position(&self, position: u32) {
        lock(&self.failing_positions).insert(position);
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_positions).clear();
    }

    pub fn set_header_unavailable(&self, unavailable: bool) {
        self.header_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current content of row `position`.
    pub fn row(&self, position: u32) -> Option<Vec<String>> {
        lock(&self.rows).get(&position).cloned()
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(u32, Vec<String>)> {
        lock(&self.writes).clone()
    }

    pub fn header_reads(&self) -> usize {
        self.header_reads.load(Ordering::SeqCst)
    }
}

impl SheetClient for MemorySheet {
    fn header_row(&self) -> Result<Vec<String>, SheetError> {
        self.header_reads.fetch_add(1, Ordering::SeqCst);
        if self.header_unavailable.load(Ordering::SeqCst) {
            return Err(SheetError::Unavailable("memory sheet offline".to_string()));
        }
        Ok(lock(&self.header).clone())
    }

    fn write_row(&self, position: u32, values: &[String]) -> Result<(), SheetError> {
        if lock(&self.failing_positions).contains(&position) {
            return Err(SheetError::Rejected {
                status: 500,
                message: format!("row {position} write failed"),
            });
        }
        lock(&self.rows).insert(position, values.to_vec());
        lock(&self.writes).push((position, values.to_vec()));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
