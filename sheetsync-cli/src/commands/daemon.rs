//! `sheetsync daemon`: run the sync loop, stop it, or ask how it is doing.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::{json, Value};

use sheetsync_daemon::paths::socket_path;
use sheetsync_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (poll ticker + socket server).
    Start,
    /// Ask a running daemon to finish its current work and exit.
    Stop,
    /// Show the watermark, counters and last poll of a running daemon.
    Status {
        /// Print the raw JSON payload.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("{} daemon stop requested", "✓".green().bold()),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status { json } => {
            let status = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn print_status(status: &Value) {
    if status["running"] != json!(true) {
        println!(
            "{} daemon is not running (socket {})",
            "•".dimmed(),
            status["socket"].as_str().unwrap_or("?")
        );
        return;
    }

    let count = |key: &str| status[key].as_u64().unwrap_or(0);
    println!(
        "{} daemon running (pid {})",
        "●".green().bold(),
        count("pid")
    );
    println!(
        "  watermark:  {}",
        status["watermark"].as_str().unwrap_or("?")
    );
    println!("  interval:   {} ms", count("poll_interval_ms"));
    println!(
        "  polls:      {} completed, {} failed",
        count("polls_completed"),
        count("polls_failed")
    );
    println!(
        "  inbound:    {} accepted, {} rejected",
        count("inbound_accepted"),
        count("inbound_rejected")
    );

    let last = &status["last_poll"];
    if last.is_null() {
        println!("  last poll:  none yet");
        return;
    }
    let last_count = |key: &str| last[key].as_u64().unwrap_or(0);
    let line = format!(
        "{} changed, {} pushed, {} failed, {} skipped via {}",
        last_count("selected"),
        last_count("pushed"),
        last_count("failed"),
        last_count("skipped"),
        last["source"].as_str().unwrap_or("?"),
    );
    match last["error_kind"].as_str() {
        Some(kind) => println!(
            "  last poll:  {} ({kind}: {})",
            line.red(),
            last["error"].as_str().unwrap_or("")
        ),
        None => println!("  last poll:  {line}"),
    }
}
