//! sheetsync: keep a SQLite table and a spreadsheet in sync.
//!
//! # Usage
//!
//! ```text
//! sheetsync init --spreadsheet <id> --database <path> [--table <name>] [--sheet <name>] [--force]
//! sheetsync push <row_id> --field Name=Ava --field Role=Eng
//! sheetsync push <row_id> --json '{"Name":"Ava","Age":31}'
//! sheetsync poll
//! sheetsync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, init::InitArgs, poll::PollArgs, push::PushArgs};

#[derive(Parser, Debug)]
#[command(
    name = "sheetsync",
    version,
    about = "Bidirectional sync between a database table and a spreadsheet",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.sheetsync/config.yaml.
    Init(InitArgs),

    /// Send one record from the sheet side to the running daemon.
    Push(PushArgs),

    /// Ask the running daemon for an immediate table → sheet poll.
    Poll(PollArgs),

    /// Run, stop or inspect the sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Push(args) => args.run(),
        Commands::Poll(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
