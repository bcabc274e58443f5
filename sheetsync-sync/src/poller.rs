//! Change poller: the outbound (table → sheet) path.
//!
//! One cycle:
//! 1. Capture the cycle start instant and read the watermark.
//! 2. Select rows modified strictly after the watermark. None → done.
//! 3. Read the sheet header once for the whole cycle.
//! 4. Project each row into header order and write it at its row position.
//! 5. If every push succeeded, advance the watermark to just before the
//!    millisecond the cycle started in.
//!
//! Advancing to the start rather than the end keeps table writes that land
//! mid-cycle eligible for the next one. Backing off to the millisecond keeps
//! them eligible in datastores that stamp rows in milliseconds. A failed push keeps the watermark
//! where it was so the batch is retried; rows that did go out may be pushed
//! once more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use sheetsync_core::{sanitize_field_name, ColumnName, RowId};

use crate::error::SyncError;
use crate::sheet::SheetClient;
use crate::store::{Datastore, Row};
use crate::watermark::{self, Watermark};

/// Cooperative cancellation for a poll cycle, checked between row pushes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Rows modified after the watermark.
    pub selected: usize,
    pub pushed: usize,
    pub failed: Vec<RowId>,
    /// Rows whose id cannot address a sheet row.
    pub skipped: Vec<RowId>,
    pub cancelled: bool,
    /// New watermark, when the cycle advanced it.
    pub advanced_to: Option<DateTime<Utc>>,
    pub duration_ms: u128,
}

pub struct ChangePoller {
    store: Arc<dyn Datastore>,
    sheet: Arc<dyn SheetClient>,
    watermark: Arc<Watermark>,
}

impl ChangePoller {
    pub fn new(
        store: Arc<dyn Datastore>,
        sheet: Arc<dyn SheetClient>,
        watermark: Arc<Watermark>,
    ) -> Self {
        Self {
            store,
            sheet,
            watermark,
        }
    }

    /// Run one uncancellable cycle.
    pub fn run_cycle(&self) -> Result<PollReport, SyncError> {
        self.run_cycle_with(&CancelToken::new())
    }

    /// Run one cycle, stopping between rows once `cancel` fires.
    ///
    /// Selection and header failures abort the cycle with
    /// [`SyncError::TransientIo`] and leave the watermark untouched.
    pub fn run_cycle_with(&self, cancel: &CancelToken) -> Result<PollReport, SyncError> {
        let started = Instant::now();
        let cycle_start = watermark::now();
        let since = self.watermark.get();

        let rows = self
            .store
            .select_modified_since(since)
            .map_err(|e| SyncError::TransientIo(format!("selecting changed rows: {e}")))?;

        let mut report = PollReport {
            selected: rows.len(),
            ..PollReport::default()
        };
        if rows.is_empty() {
            report.duration_ms = started.elapsed().as_millis();
            return Ok(report);
        }

        let headers = self
            .sheet
            .header_row()
            .map_err(|e| SyncError::TransientIo(format!("reading header row: {e}")))?;
        let layout = HeaderLayout::new(headers);

        for row in &rows {
            if cancel.is_cancelled() {
                tracing::info!(pushed = report.pushed, "poll cycle cancelled");
                report.cancelled = true;
                break;
            }
            let Some(position) = row.row_id.sheet_position() else {
                tracing::warn!(row_id = %row.row_id, "row id is not a sheet position; skipping");
                report.skipped.push(row.row_id.clone());
                continue;
            };

            let values = layout.project(row);
            match self.sheet.write_row(position, &values) {
                Ok(()) => {
                    tracing::debug!(row_id = %row.row_id, position, "pushed row to sheet");
                    report.pushed += 1;
                }
                Err(err) => {
                    tracing::error!(row_id = %row.row_id, error = %err, "failed to push row");
                    report.failed.push(row.row_id.clone());
                }
            }
        }

        if report.failed.is_empty() && !report.cancelled {
            self.watermark.advance(watermark::cycle_resume_point(cycle_start));
            report.advanced_to = Some(self.watermark.get());
        }
        report.duration_ms = started.elapsed().as_millis();

        tracing::info!(
            selected = report.selected,
            pushed = report.pushed,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "poll cycle finished",
        );
        Ok(report)
    }
}

/// Header row resolved once per cycle.
///
/// Each header maps to the exact field name and its sanitized column name.
pub(crate) struct HeaderLayout {
    lookups: Vec<(String, ColumnName)>,
}

impl HeaderLayout {
    pub(crate) fn new(headers: Vec<String>) -> Self {
        let lookups = headers
            .into_iter()
            .map(|header| {
                let sanitized = sanitize_field_name(&header);
                (header, sanitized)
            })
            .collect();
        Self { lookups }
    }

    /// Row values in header order: exact name, then sanitized name, then `""`.
    pub(crate) fn project(&self, row: &Row) -> Vec<String> {
        self.lookups
            .iter()
            .map(|(exact, sanitized)| {
                lookup(row, exact)
                    .or_else(|| lookup(row, sanitized.as_str()))
                    .unwrap_or_default()
            })
            .collect()
    }
}

fn lookup(row: &Row, column: &str) -> Option<String> {
    row.values.get(column).cloned().flatten()
}
