//! Configuration resolution and graceful degradation
//!
//! Uses serial_test because several tests manipulate AUTODJ_CONFIG.

use autodj_common::config::{resolve_config_path, DjConfig, CONFIG_ENV_VAR};
use autodj_common::Error;
use serial_test::serial;
use std::env;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_cli_path_beats_env_var() {
    let from_env = write_config("[session]\nplan_threshold_ms = 1000\n");
    let from_cli = write_config("[session]\nplan_threshold_ms = 2000\n");
    env::set_var(CONFIG_ENV_VAR, from_env.path());

    let resolved = resolve_config_path(Some(from_cli.path())).unwrap();
    assert_eq!(resolved, from_cli.path());

    let config = DjConfig::load(Some(from_cli.path())).unwrap();
    assert_eq!(config.session.plan_threshold_ms, 2000);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_path() {
    let file = write_config("[decks]\ncrossfade_steps = 8\n");
    env::set_var(CONFIG_ENV_VAR, file.path());

    let config = DjConfig::load(None).unwrap();
    assert_eq!(config.decks.crossfade_steps, 8);
    assert_eq!(config.decks.crossfade_ms, 14_000);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_malformed_file_is_config_error() {
    let file = write_config("[planner\nkey_weight = ");
    let err = DjConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = DjConfig::load(Some(&missing)).unwrap();
    assert_eq!(config.session.plan_threshold_ms, 25_000);

    env::set_var(CONFIG_ENV_VAR, &missing);
    let config = DjConfig::load(None).unwrap();
    assert_eq!(config.decks.crossfade_steps, 40);
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_database_path_override() {
    let file = write_config("database_path = \"/tmp/autodj-test.db\"\n");
    let config = DjConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.database_path().to_string_lossy(), "/tmp/autodj-test.db");
}
