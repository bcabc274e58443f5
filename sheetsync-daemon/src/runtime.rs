use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use sheetsync_core::{config, SyncConfig};
use sheetsync_sync::google::GoogleSheetClient;
use sheetsync_sync::sqlite::SqliteDatastore;
use sheetsync_sync::{CancelToken, InboundRecord, PollReport, SyncError, SyncService};

use crate::error::{io_err, DaemonError};
use crate::paths::{sheetsync_root, socket_path, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Timing knobs for [`serve`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub poll_interval: Duration,
    /// Upper bound on one poll cycle or one inbound upsert.
    ///
    /// A poll cycle that overruns is cancelled and the next queued cycle waits
    /// until it has wound down. An inbound upsert that overruns is answered
    /// with `transient_io` but keeps running and may still commit; resending
    /// the record is safe since upserts are idempotent.
    pub operation_timeout: Duration,
}

impl RuntimeOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            operation_timeout: config.operation_timeout(),
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(config::DEFAULT_POLL_INTERVAL_SECS),
            operation_timeout: Duration::from_secs(config::DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }
}

/// What one poll cycle did, as reported over the socket and in status.
#[derive(Debug, Clone, Serialize)]
pub struct PollSummary {
    pub source: String,
    pub selected: usize,
    pub pushed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub duration_ms: u128,
    pub finished_at_unix: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollSummary {
    fn from_outcome(
        source: &'static str,
        outcome: Result<PollReport, (&'static str, String)>,
        duration: Duration,
    ) -> Self {
        let mut summary = Self {
            source: source.to_string(),
            selected: 0,
            pushed: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            duration_ms: duration.as_millis(),
            finished_at_unix: unix_seconds_now(),
            error_kind: None,
            error: None,
        };
        match outcome {
            Ok(report) => {
                summary.selected = report.selected;
                summary.pushed = report.pushed;
                summary.failed = report.failed.len();
                summary.skipped = report.skipped.len();
                summary.cancelled = report.cancelled;
            }
            Err((kind, message)) => {
                summary.error_kind = Some(kind.to_string());
                summary.error = Some(message);
            }
        }
        summary
    }
}

struct PollJob {
    source: &'static str,
    respond_to: oneshot::Sender<PollSummary>,
}

#[derive(Debug, Default)]
struct DaemonStats {
    last_poll: Option<PollSummary>,
    polls_completed: u64,
    polls_failed: u64,
    inbound_accepted: u64,
    inbound_rejected: u64,
}

struct DaemonState {
    home: PathBuf,
    service: Arc<SyncService>,
    options: RuntimeOptions,
    started_at_unix: u64,
    stats: RwLock<DaemonStats>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load `<home>/.sheetsync/config.yaml`, connect both systems and serve.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let service = tokio::task::spawn_blocking({
        let config = config.clone();
        move || build_service(&config)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("startup join error: {err}")))??;

    serve(home, Arc::new(service), RuntimeOptions::from_config(&config)).await
}

/// Run the poll ticker, poll processor, socket server and signal handler
/// around an already-built service until one of them asks to stop.
pub async fn serve(
    home: PathBuf,
    service: Arc<SyncService>,
    options: RuntimeOptions,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state = Arc::new(DaemonState {
        home,
        service,
        options,
        started_at_unix: unix_seconds_now(),
        stats: RwLock::new(DaemonStats::default()),
    });

    let (poll_tx, poll_rx) = mpsc::channel::<PollJob>(16);
    // Receivers subscribe before any task runs so an early stop reaches all.
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        poll_interval_ms = options.poll_interval.as_millis() as u64,
        watermark = %state.service.watermark(),
        "sheetsync daemon starting",
    );

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let ticker_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let poll_tx = poll_tx.clone();
        tokio::spawn(async move {
            let result = ticker_task(poll_tx, options.poll_interval, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        tokio::spawn(async move {
            let result = poll_processor_task(state, poll_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let shutdown_rx = shutdown.subscribe();
        let poll_tx = poll_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, poll_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(poll_tx);

    let (ticker_result, processor_result, socket_result, signal_result) =
        tokio::join!(ticker_handle, processor_handle, socket_handle, signal_handle);

    handle_join("poll_ticker", ticker_result)?;
    handle_join("poll_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("sheetsync daemon stopped");
    Ok(())
}

fn build_service(config: &SyncConfig) -> Result<SyncService, DaemonError> {
    let pool_size = u32::try_from(config.pool_size).unwrap_or(u32::MAX);
    let store = SqliteDatastore::open(&config.database, &config.table, pool_size)?;
    let sheet = GoogleSheetClient::from_env(
        &config.spreadsheet_id,
        &config.sheet_name,
        &config.access_token_env,
    )?;
    tracing::info!(
        database = %config.database.display(),
        table = %config.table,
        spreadsheet = %config.spreadsheet_id,
        sheet = %config.sheet_name,
        "sync service ready",
    );
    Ok(SyncService::new(Arc::new(store), Arc::new(sheet)))
}

async fn ticker_task(
    poll_tx: mpsc::Sender<PollJob>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_poll(&poll_tx, "ticker").await {
                    Ok(summary) => tracing::debug!(
                        pushed = summary.pushed,
                        duration_ms = summary.duration_ms,
                        "scheduled poll finished",
                    ),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::warn!(error = %err, "scheduled poll not run"),
                }
            }
        }
    }
    Ok(())
}

async fn poll_processor_task(
    state: Arc<DaemonState>,
    mut poll_rx: mpsc::Receiver<PollJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = poll_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let cancel = CancelToken::new();
                let mut handle = {
                    let service = state.service.clone();
                    let cancel = cancel.clone();
                    tokio::task::spawn_blocking(move || service.run_poll_cycle_with(&cancel))
                };

                let timeout = state.options.operation_timeout;
                let mut shutting_down = false;
                let mut abandoned = false;
                let outcome = tokio::select! {
                    joined = tokio::time::timeout(timeout, &mut handle) => match joined {
                        Ok(Ok(result)) => result.map_err(|err| (err.kind(), err.to_string())),
                        Ok(Err(err)) => Err(("transient_io", format!("poll task join error: {err}"))),
                        Err(_) => {
                            cancel.cancel();
                            abandoned = true;
                            Err(("transient_io", format!("poll cycle exceeded {timeout:?}")))
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        cancel.cancel();
                        abandoned = true;
                        shutting_down = true;
                        Err(("transient_io", "poll cycle cancelled by shutdown".to_string()))
                    }
                };

                if let Err((kind, message)) = &outcome {
                    tracing::error!(kind, error = %message, source = job.source, "poll cycle failed");
                }
                let summary = PollSummary::from_outcome(job.source, outcome, started.elapsed());
                record_poll(&state, &summary).await;
                let _ = job.respond_to.send(summary);

                // The cancelled cycle stops at its next row boundary. Wait for it
                // so no two cycles ever write to the sheet at once.
                if abandoned {
                    match handle.await {
                        Ok(Ok(report)) => tracing::info!(
                            pushed = report.pushed,
                            "abandoned poll cycle wound down",
                        ),
                        Ok(Err(err)) => tracing::warn!(error = %err, "abandoned poll cycle failed"),
                        Err(err) => tracing::warn!(error = %err, "abandoned poll task join error"),
                    }
                }

                if shutting_down {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn record_poll(state: &DaemonState, summary: &PollSummary) {
    let mut stats = state.stats.write().await;
    if summary.error.is_some() {
        stats.polls_failed += 1;
    } else {
        stats.polls_completed += 1;
    }
    stats.last_poll = Some(summary.clone());
}

async fn socket_server_task(
    state: Arc<DaemonState>,
    poll_tx: mpsc::Sender<PollJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let poll_tx = poll_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, poll_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    poll_tx: mpsc::Sender<PollJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::rejected("invalid_input", format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch_request(&state, &poll_tx, &shutdown_tx, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch_request(
    state: &Arc<DaemonState>,
    poll_tx: &mpsc::Sender<PollJob>,
    shutdown_tx: &broadcast::Sender<()>,
    request: DaemonRequest,
) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(state).await),
        "poll" => match enqueue_poll(poll_tx, "socket").await {
            Ok(summary) => match (&summary.error_kind, &summary.error) {
                (Some(kind), Some(error)) => DaemonResponse::rejected(kind.clone(), error.clone()),
                _ => DaemonResponse::ok(json!(summary)),
            },
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "push" => {
            let inbound = InboundRecord {
                row_id: request.row_id,
                data: request.data,
            };
            handle_push(state, inbound).await
        }
        "stop" => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn handle_push(state: &Arc<DaemonState>, inbound: InboundRecord) -> DaemonResponse {
    let service = state.service.clone();
    let timeout = state.options.operation_timeout;
    let outcome = match tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking(move || service.accept(inbound)),
    )
    .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(SyncError::TransientIo(format!("upsert task join error: {err}"))),
        Err(_) => Err(SyncError::TransientIo(format!(
            "upsert exceeded {timeout:?}; the write may still land, resending is safe"
        ))),
    };

    let mut stats = state.stats.write().await;
    match outcome {
        Ok(report) => {
            stats.inbound_accepted += 1;
            DaemonResponse::ok(json!(report))
        }
        Err(err) => {
            stats.inbound_rejected += 1;
            tracing::warn!(kind = err.kind(), error = %err, "inbound record rejected");
            DaemonResponse::rejected(err.kind(), err.to_string())
        }
    }
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let stats = state.stats.read().await;
    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "pid": std::process::id(),
        "started_at_unix": state.started_at_unix,
        "watermark": state.service.watermark().to_rfc3339(),
        "poll_interval_ms": state.options.poll_interval.as_millis() as u64,
        "polls_completed": stats.polls_completed,
        "polls_failed": stats.polls_failed,
        "inbound_accepted": stats.inbound_accepted,
        "inbound_rejected": stats.inbound_rejected,
        "last_poll": stats.last_poll,
        "socket": socket_path(&state.home).display().to_string(),
    })
}

async fn enqueue_poll(
    poll_tx: &mpsc::Sender<PollJob>,
    source: &'static str,
) -> Result<PollSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    poll_tx
        .send(PollJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("poll queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("poll response"))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = sheetsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filters (default `info`); `SHEETSYNC_LOG_FORMAT=json` switches
/// to one JSON object per line.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SHEETSYNC_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
