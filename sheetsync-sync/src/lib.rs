//! # sheetsync-sync
//!
//! Bidirectional table ⇄ spreadsheet synchronization engine.
//!
//! Build a [`SyncService`] from a [`Datastore`] and a [`SheetClient`], then
//! call [`SyncService::handle_inbound`] for every record the sheet pushes and
//! [`SyncService::run_poll_cycle`] on a timer to push table-side changes back
//! out. The shared [`Watermark`] keeps the two directions from echoing each
//! other's writes.

pub mod error;
pub mod google;
pub mod memory;
pub mod poller;
pub mod schema;
pub mod service;
pub mod sheet;
pub mod sqlite;
pub mod store;
pub mod upsert;
pub mod watermark;

pub use error::{SheetError, StoreError, SyncError};
pub use poller::{CancelToken, ChangePoller, PollReport};
pub use schema::{SchemaAdapter, SchemaOutcome};
pub use service::{InboundRecord, SyncService};
pub use sheet::SheetClient;
pub use store::{Datastore, Row, UpsertPlan};
pub use upsert::{UpsertEngine, UpsertReport};
pub use watermark::Watermark;
