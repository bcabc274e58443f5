//! Config error-message, validation, and init integration tests.
//! Storage: ~/.sheetsync/config.yaml

use std::fs;
use std::path::PathBuf;

use rstest::rstest;
use sheetsync_core::{config, ConfigError, SyncConfig};

fn sample() -> SyncConfig {
    SyncConfig::new(PathBuf::from("/data/sheet_sync.db"), "12gqxqdM46ii9fLDmsPSjev4ZgwhWj2drcSWhYmuIY24")
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
    assert!(err.to_string().contains("sheetsync init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = config::sheetsync_root(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_rejects_invalid_values_on_disk() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = config::sheetsync_root(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join("config.yaml"),
        "database: /tmp/x.db\nspreadsheet_id: abc\npoll_interval_secs: 0\ncreated_at: 2026-01-01T00:00:00Z\n",
    )
    .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(
        matches!(err, ConfigError::Invalid { field: "poll_interval_secs", .. }),
        "got: {err}"
    );
}

// ---------------------------------------------------------------------------
// 2. Validation table
// ---------------------------------------------------------------------------

#[rstest]
#[case::empty_table("table", |c: &mut SyncConfig| c.table.clear())]
#[case::table_with_space("table", |c: &mut SyncConfig| c.table = "sheet sync".to_string())]
#[case::blank_spreadsheet("spreadsheet_id", |c: &mut SyncConfig| c.spreadsheet_id = "  ".to_string())]
#[case::blank_sheet_name("sheet_name", |c: &mut SyncConfig| c.sheet_name.clear())]
#[case::zero_timeout("operation_timeout_secs", |c: &mut SyncConfig| c.operation_timeout_secs = 0)]
#[case::zero_pool("pool_size", |c: &mut SyncConfig| c.pool_size = 0)]
fn validation_names_the_offending_field(
    #[case] expected: &str,
    #[case] mutate: fn(&mut SyncConfig),
) {
    let mut config = sample();
    mutate(&mut config);
    match config.validate() {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
        other => panic!("expected invalid {expected}, got {other:?}"),
    }
}

#[test]
fn save_refuses_invalid_config_and_writes_nothing() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut config = sample();
    config.pool_size = 0;
    assert!(config::save_at(home.path(), &config).is_err());
    assert!(!config::config_path_at(home.path()).exists());
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_root_dir_with_private_mode() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let (_, created) = config::init_at(home.path(), sample()).expect("init");
    assert!(created);

    let root = config::sheetsync_root(home.path());
    assert!(root.is_dir());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}

#[test]
fn home_not_found_error_message() {
    assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
}
