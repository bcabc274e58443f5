use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;
use rusqlite::Connection;
use tempfile::TempDir;

use sheetsync_core::{ColumnName, FieldValue, Record, RowId};
use sheetsync_sync::memory::{MemoryDatastore, MemorySheet};
use sheetsync_sync::sqlite::SqliteDatastore;
use sheetsync_sync::watermark::{self, Watermark};
use sheetsync_sync::{ChangePoller, Datastore, InboundRecord, SyncService, UpsertPlan};

/// A datastore plus a way to edit it behind the engine's back.
struct Table {
    store: Arc<dyn Datastore>,
    edit: Box<dyn Fn(&str, &str, &str)>,
    _dir: Option<TempDir>,
}

fn memory_table() -> Table {
    let store = Arc::new(MemoryDatastore::new());
    let handle = store.clone();
    Table {
        store,
        edit: Box::new(move |id, column, value| {
            handle
                .update_field(&RowId::from(id), column, Some(value))
                .expect("edit");
        }),
        _dir: None,
    }
}

fn sqlite_table() -> Table {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sync.db");
    let store = Arc::new(SqliteDatastore::open(&path, "sheet_sync", 2).expect("open"));
    Table {
        store,
        edit: Box::new(move |id, column, value| {
            let conn = Connection::open(&path).expect("conn");
            conn.execute(
                &format!("UPDATE sheet_sync SET \"{column}\" = ?1 WHERE _sheet_row_id = ?2"),
                [value, id],
            )
            .expect("edit");
        }),
        _dir: Some(dir),
    }
}

fn inbound(json: &str) -> InboundRecord {
    serde_json::from_str(json).expect("inbound json")
}

#[rstest]
#[case::memory(memory_table())]
#[case::sqlite(sqlite_table())]
fn inbound_then_table_edit_round_trips_to_sheet_row(#[case] table: Table) {
    let sheet = Arc::new(MemorySheet::with_header(&["Name", "Role"]));
    let service = SyncService::new(table.store.clone(), sheet.clone());

    let report = service
        .accept(inbound(r#"{"row_id":"7","data":{"Name":"Ava","Role":"Eng"}}"#))
        .expect("inbound");
    let created: Vec<_> = report.created_columns.iter().map(|c| c.as_str()).collect();
    assert_eq!(created, vec!["Name", "Role"]);

    let echo = service.run_poll_cycle().expect("echo poll");
    assert_eq!(echo.selected, 0, "inbound write must not be echoed");

    thread::sleep(Duration::from_millis(5));
    (table.edit)("7", "Role", "Lead");
    thread::sleep(Duration::from_millis(5));

    let report = service.run_poll_cycle().expect("poll");
    assert_eq!(report.pushed, 1);
    assert_eq!(sheet.row(7), Some(vec!["Ava".to_string(), "Lead".to_string()]));

    let quiet = service.run_poll_cycle().expect("quiet poll");
    assert_eq!(quiet.selected, 0);
}

#[rstest]
#[case::memory(memory_table())]
#[case::sqlite(sqlite_table())]
fn repeated_inbound_is_idempotent(#[case] table: Table) {
    let sheet = Arc::new(MemorySheet::with_header(&["First Name"]));
    let service = SyncService::new(table.store.clone(), sheet);
    let id = RowId::from("3");
    let mut record = Record::new();
    record.insert("First Name".to_string(), FieldValue::from("Ava"));
    record.insert("Age".to_string(), serde_json::from_str("31").expect("number"));

    service.handle_inbound(&id, &record).expect("first");
    let columns = table.store.list_columns().expect("columns");
    service.handle_inbound(&id, &record).expect("second");

    assert_eq!(table.store.list_columns().expect("columns"), columns);
    let rows = table
        .store
        .select_modified_since(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values["First_Name"].as_deref(), Some("Ava"));
    assert_eq!(rows[0].values["Age"].as_deref(), Some("31"));
}

#[test]
fn sheet_outage_is_retried_on_next_cycle() {
    let table = memory_table();
    let sheet = Arc::new(MemorySheet::with_header(&["Name"]));
    let service = SyncService::new(table.store.clone(), sheet.clone());
    service
        .accept(inbound(r#"{"row_id":"2","data":{"Name":"Ava"}}"#))
        .expect("inbound");

    thread::sleep(Duration::from_millis(2));
    (table.edit)("2", "Name", "Bo");
    sheet.set_header_unavailable(true);
    let before = service.watermark();
    let err = service.run_poll_cycle().unwrap_err();
    assert_eq!(err.kind(), "transient_io");
    assert_eq!(service.watermark(), before);

    sheet.set_header_unavailable(false);
    let report = service.run_poll_cycle().expect("recovered poll");
    assert_eq!(report.pushed, 1);
    assert_eq!(sheet.row(2), Some(vec!["Bo".to_string()]));
}

#[test]
fn sqlite_edit_in_the_cycle_start_millisecond_is_not_lost() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sync.db");
    let store = Arc::new(SqliteDatastore::open(&path, "sheet_sync", 2).expect("open"));
    store.add_column(&ColumnName::from("Role")).expect("column");
    store
        .upsert(&UpsertPlan {
            row_id: RowId::from("4"),
            fields: vec![(ColumnName::from("Role"), Some("Eng".to_string()))],
        })
        .expect("seed");
    thread::sleep(Duration::from_millis(5));

    let sheet = Arc::new(MemorySheet::with_header(&["Role"]));
    let clock = Arc::new(Watermark::new(
        watermark::now() - chrono::Duration::seconds(1),
    ));
    let poller = ChangePoller::new(store, sheet.clone(), clock);
    let first = poller.run_cycle().expect("first cycle");
    assert_eq!(first.pushed, 1);

    // Stamp an edit with the millisecond the first cycle started in, as a
    // write racing the cycle would be.
    let resumed_at = first.advanced_to.expect("advanced");
    let cycle_ms = (resumed_at + chrono::Duration::microseconds(1)).timestamp_millis();
    let conn = Connection::open(&path).expect("conn");
    conn.execute(
        "UPDATE sheet_sync SET Role = 'Lead', updated_at = ?1 WHERE _sheet_row_id = '4'",
        [cycle_ms],
    )
    .expect("edit");

    let second = poller.run_cycle().expect("second cycle");
    assert_eq!(second.selected, 1);
    assert_eq!(sheet.row(4), Some(vec!["Lead".to_string()]));
}
