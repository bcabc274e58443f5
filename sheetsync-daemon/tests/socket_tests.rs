use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use sheetsync_core::{FieldValue, Record, RowId};
use sheetsync_daemon::paths::socket_path;
use sheetsync_daemon::{
    request_poll, request_push, request_status, request_stop, serve, DaemonError, RuntimeOptions,
};
use sheetsync_sync::memory::{MemoryDatastore, MemorySheet};
use sheetsync_sync::SyncService;

struct Running {
    home: TempDir,
    store: Arc<MemoryDatastore>,
    sheet: Arc<MemorySheet>,
    daemon: tokio::task::JoinHandle<Result<(), DaemonError>>,
}

async fn start(poll_interval: Duration) -> Running {
    let home = TempDir::new().expect("home");
    let store = Arc::new(MemoryDatastore::new());
    let sheet = Arc::new(MemorySheet::with_header(&["Name", "Role"]));
    let service = Arc::new(SyncService::new(store.clone(), sheet.clone()));
    let options = RuntimeOptions {
        poll_interval,
        operation_timeout: Duration::from_secs(5),
    };
    let daemon = tokio::spawn(serve(home.path().to_path_buf(), service, options));

    let socket = socket_path(home.path());
    for _ in 0..200 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(socket.exists(), "daemon socket never appeared");

    Running {
        home,
        store,
        sheet,
        daemon,
    }
}

/// Run a blocking protocol call off the async worker.
async fn blocking<T, F>(home: &Path, call: F) -> T
where
    F: FnOnce(PathBuf) -> T + Send + 'static,
    T: Send + 'static,
{
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || call(home))
        .await
        .expect("join")
}

fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_poll_status_stop_over_unix_socket() {
    let running = start(Duration::from_secs(3600)).await;
    let home = running.home.path();

    let report = blocking(home, |home| {
        request_push(
            &home,
            RowId::from("7"),
            record(&[("Name", "Ava"), ("Role", "Eng")]),
        )
    })
    .await
    .expect("push");
    assert_eq!(report["row_id"], json!("7"));

    tokio::time::sleep(Duration::from_millis(5)).await;
    running
        .store
        .update_field(&RowId::from("7"), "Role", Some("Lead"))
        .expect("edit");

    let summary = blocking(home, |home| request_poll(&home)).await.expect("poll");
    assert_eq!(summary["pushed"], json!(1));
    assert_eq!(
        running.sheet.row(7),
        Some(vec!["Ava".to_string(), "Lead".to_string()])
    );

    let status: Value = blocking(home, |home| request_status(&home)).await.expect("status");
    assert_eq!(status["running"], json!(true));
    assert_eq!(status["inbound_accepted"], json!(1));
    assert_eq!(status["polls_completed"], json!(1));
    assert_eq!(status["last_poll"]["source"], json!("socket"));

    blocking(home, |home| request_stop(&home)).await.expect("stop");
    running.daemon.await.expect("join").expect("daemon result");
    assert!(!socket_path(home).exists(), "socket removed on shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_push_carries_error_kind() {
    let running = start(Duration::from_secs(3600)).await;
    let home = running.home.path();

    let err = blocking(home, |home| request_push(&home, RowId::from("  "), record(&[("Name", "x")])))
        .await
        .unwrap_err();
    match err {
        DaemonError::Rejected { kind, .. } => assert_eq!(kind, "invalid_input"),
        other => panic!("unexpected error: {other:?}"),
    }

    blocking(home, |home| request_stop(&home)).await.expect("stop");
    running.daemon.await.expect("join").expect("daemon result");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ticker_pushes_table_edits_without_being_asked() {
    let running = start(Duration::from_millis(25)).await;
    let home = running.home.path();

    blocking(home, |home| {
        request_push(&home, RowId::from("3"), record(&[("Name", "Bo"), ("Role", "Ops")]))
    })
    .await
    .expect("push");
    tokio::time::sleep(Duration::from_millis(5)).await;
    running
        .store
        .update_field(&RowId::from("3"), "Name", Some("Bea"))
        .expect("edit");

    let mut pushed = None;
    for _ in 0..100 {
        pushed = running.sheet.row(3);
        if pushed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(pushed, Some(vec!["Bea".to_string(), "Ops".to_string()]));

    blocking(home, |home| request_stop(&home)).await.expect("stop");
    running.daemon.await.expect("join").expect("daemon result");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_daemon_refuses_a_live_socket() {
    let running = start(Duration::from_secs(3600)).await;
    let home = running.home.path().to_path_buf();

    let store = Arc::new(MemoryDatastore::new());
    let sheet = Arc::new(MemorySheet::with_header(&["Name"]));
    let service = Arc::new(SyncService::new(store, sheet));
    let second = serve(home.clone(), service, RuntimeOptions::default()).await;
    assert!(matches!(second, Err(DaemonError::Protocol(_))));

    blocking(&home, |home| request_stop(&home)).await.expect("stop");
    running.daemon.await.expect("join").expect("daemon result");
}
