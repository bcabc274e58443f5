//! `sheetsync poll`: run one table → sheet cycle now.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use sheetsync_daemon::request_poll;

use super::explain;

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Print the raw JSON summary.
    #[arg(long)]
    pub json: bool,
}

impl PollArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let summary = request_poll(&home).map_err(|err| explain(err, "poll"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }

        let count = |key: &str| summary[key].as_u64().unwrap_or(0);
        let mark = if count("failed") == 0 {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        println!(
            "{mark} poll: {} changed, {} pushed, {} failed, {} skipped ({} ms)",
            count("selected"),
            count("pushed"),
            count("failed"),
            count("skipped"),
            count("duration_ms"),
        );
        Ok(())
    }
}
