//! Sync service: one watermark shared by the inbound and outbound paths.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use sheetsync_core::{Record, RowId};

use crate::error::SyncError;
use crate::poller::{CancelToken, ChangePoller, PollReport};
use crate::schema::SchemaAdapter;
use crate::sheet::SheetClient;
use crate::store::Datastore;
use crate::upsert::{UpsertEngine, UpsertReport};
use crate::watermark::Watermark;

/// An inbound payload as it arrives over the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundRecord {
    #[serde(default)]
    pub row_id: Option<RowId>,
    #[serde(default)]
    pub data: Option<Record>,
}

impl InboundRecord {
    pub fn into_parts(self) -> Result<(RowId, Record), SyncError> {
        let row_id = self
            .row_id
            .ok_or_else(|| SyncError::InvalidInput("missing row_id".to_string()))?;
        let data = self
            .data
            .ok_or_else(|| SyncError::InvalidInput("missing data".to_string()))?;
        Ok((row_id, data))
    }
}

pub struct SyncService {
    watermark: Arc<Watermark>,
    upsert: UpsertEngine,
    poller: ChangePoller,
}

impl SyncService {
    /// Service whose watermark starts at the current instant.
    pub fn new(store: Arc<dyn Datastore>, sheet: Arc<dyn SheetClient>) -> Self {
        Self::with_watermark(store, sheet, Arc::new(Watermark::starting_now()))
    }

    pub fn with_watermark(
        store: Arc<dyn Datastore>,
        sheet: Arc<dyn SheetClient>,
        watermark: Arc<Watermark>,
    ) -> Self {
        Self {
            upsert: UpsertEngine::new(store.clone(), watermark.clone()),
            poller: ChangePoller::new(store, sheet, watermark.clone()),
            watermark,
        }
    }

    /// Upsert one record pushed by the sheet.
    pub fn handle_inbound(&self, row_id: &RowId, record: &Record) -> Result<UpsertReport, SyncError> {
        self.upsert.upsert(row_id, record)
    }

    /// Validate a raw payload, then upsert it.
    pub fn accept(&self, inbound: InboundRecord) -> Result<UpsertReport, SyncError> {
        let (row_id, record) = inbound.into_parts()?;
        self.handle_inbound(&row_id, &record)
    }

    pub fn run_poll_cycle(&self) -> Result<PollReport, SyncError> {
        self.poller.run_cycle()
    }

    pub fn run_poll_cycle_with(&self, cancel: &CancelToken) -> Result<PollReport, SyncError> {
        self.poller.run_cycle_with(cancel)
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark.get()
    }

    pub fn schema(&self) -> &SchemaAdapter {
        self.upsert.schema()
    }
}
