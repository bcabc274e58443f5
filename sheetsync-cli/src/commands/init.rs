//! `sheetsync init --spreadsheet <id> --database <path> [...]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use sheetsync_core::config::{self, DEFAULT_ACCESS_TOKEN_ENV, DEFAULT_SHEET_NAME, DEFAULT_TABLE};
use sheetsync_core::SyncConfig;

/// Write the sync configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Spreadsheet id (the long token in the sheet's URL).
    #[arg(long)]
    pub spreadsheet: String,

    /// SQLite database file; created on first daemon start if missing.
    #[arg(long)]
    pub database: PathBuf,

    /// Table the sheet is mirrored into.
    #[arg(long, default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Sheet (tab) name inside the spreadsheet.
    #[arg(long, default_value = DEFAULT_SHEET_NAME)]
    pub sheet: String,

    /// Environment variable holding the API bearer token.
    #[arg(long, default_value = DEFAULT_ACCESS_TOKEN_ENV)]
    pub token_env: String,

    /// Seconds between table → sheet polls.
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let database = if self.database.is_absolute() {
            self.database.clone()
        } else {
            std::env::current_dir()
                .context("could not determine current directory")?
                .join(&self.database)
        };

        let mut settings = SyncConfig::new(database, self.spreadsheet);
        settings.table = self.table;
        settings.sheet_name = self.sheet;
        settings.access_token_env = self.token_env;
        if let Some(secs) = self.poll_interval_secs {
            settings.poll_interval_secs = secs;
        }

        let path = config::config_path_at(&home);
        if self.force {
            config::save_at(&home, &settings).context("failed to write config")?;
            println!("{} wrote {}", "✓".green().bold(), path.display());
            return Ok(());
        }

        let (settings, created) = config::init_at(&home, settings).context("failed to write config")?;
        if created {
            println!("{} wrote {}", "✓".green().bold(), path.display());
        } else {
            println!(
                "{} already initialized at {} (use --force to overwrite)",
                "•".yellow().bold(),
                path.display()
            );
        }
        println!("  database: {}", settings.database.display());
        println!("  table:    {}", settings.table);
        println!("  sheet:    {} / {}", settings.spreadsheet_id, settings.sheet_name);
        Ok(())
    }
}
