//! Sync configuration stored as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.sheetsync/
//!   config.yaml      (mode 0600, written by `sheetsync init`)
//!   daemon.sock      (daemon runtime)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::sanitize_field_name;

pub const DEFAULT_TABLE: &str = "sheet_sync";
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";
pub const DEFAULT_ACCESS_TOKEN_ENV: &str = "SHEETSYNC_ACCESS_TOKEN";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Everything the daemon needs to wire a table to a sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// SQLite database file holding the synced table.
    pub database: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
    pub spreadsheet_id: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// Environment variable the OAuth bearer token is read from.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    pub created_at: DateTime<Utc>,
}

impl SyncConfig {
    /// A config with every optional field at its default.
    pub fn new(database: PathBuf, spreadsheet_id: impl Into<String>) -> Self {
        Self {
            database,
            table: default_table(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: default_sheet_name(),
            access_token_env: default_access_token_env(),
            poll_interval_secs: default_poll_interval_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            pool_size: default_pool_size(),
            created_at: Utc::now(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.is_empty() || sanitize_field_name(&self.table).0 != self.table {
            return Err(ConfigError::Invalid {
                field: "table",
                reason: format!("'{}' must match [A-Za-z0-9_]+", self.table),
            });
        }
        if self.spreadsheet_id.trim().is_empty() {
            return Err(invalid("spreadsheet_id", "must not be empty"));
        }
        if self.sheet_name.trim().is_empty() {
            return Err(invalid("sheet_name", "must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be at least 1"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(invalid("operation_timeout_secs", "must be at least 1"));
        }
        if self.pool_size == 0 {
            return Err(invalid("pool_size", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_sheet_name() -> String {
    DEFAULT_SHEET_NAME.to_string()
}

fn default_access_token_env() -> String {
    DEFAULT_ACCESS_TOKEN_ENV.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.sheetsync/`: pure, no I/O.
pub fn sheetsync_root(home: &Path) -> PathBuf {
    home.join(".sheetsync")
}

/// `<home>/.sheetsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    sheetsync_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.sheetsync/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config.
///
/// Write flow: validate → serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let dir = sheetsync_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write `config` if no config exists yet.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
/// The returned flag is `true` when a new file was written.
pub fn init_at(home: &Path, config: SyncConfig) -> Result<(SyncConfig, bool), ConfigError> {
    if config_path_at(home).exists() {
        return Ok((load_at(home)?, false));
    }
    save_at(home, &config)?;
    Ok((config, true))
}

/// `init_at` convenience wrapper.
pub fn init(config: SyncConfig) -> Result<(SyncConfig, bool), ConfigError> {
    init_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SyncConfig {
        SyncConfig::new(PathBuf::from("/data/sync.db"), "sheet-abc")
    }

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".sheetsync/config.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let config = sample();
        save_at(home.path(), &config).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn save_sets_file_mode_and_cleans_tmp() {
        let home = TempDir::new().expect("tempdir");
        save_at(home.path(), &sample()).expect("save");
        let path = config_path_at(home.path());
        assert!(!path.with_file_name("config.yaml.tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn init_is_idempotent() {
        let home = TempDir::new().expect("tempdir");
        let (first, created) = init_at(home.path(), sample()).expect("init");
        assert!(created);

        let mut other = sample();
        other.spreadsheet_id = "different".to_string();
        let (second, created) = init_at(home.path(), other).expect("init again");
        assert!(!created);
        assert_eq!(second.spreadsheet_id, first.spreadsheet_id);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let home = TempDir::new().expect("tempdir");
        let dir = sheetsync_root(home.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            config_path_at(home.path()),
            "database: /data/sync.db\nspreadsheet_id: abc\ncreated_at: 2026-01-01T00:00:00Z\n",
        )
        .unwrap();

        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded.table, DEFAULT_TABLE);
        assert_eq!(loaded.sheet_name, DEFAULT_SHEET_NAME);
        assert_eq!(loaded.poll_interval(), Duration::from_secs(5));
        assert_eq!(loaded.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn unsafe_table_name_is_rejected() {
        let mut config = sample();
        config.table = "sheet sync; DROP".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "table", .. }));
    }
}
