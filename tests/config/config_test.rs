//! Coverage for config parsing, precedence and path resolution.

use std::path::PathBuf;
use std::time::Duration;

use warden::config::{config_dir, Config, DEFAULT_KEY_ALIAS};

#[test]
fn config_dir_resolves() {
    let dir = config_dir().expect("config dir should resolve");
    assert!(dir.ends_with(".warden"));
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[paths]
data_dir = "/srv/warden"
database = "/srv/db/warden.db"

[vault]
key_alias = "device_key"

[gateway]
allowed_commands = ["start-theft-mode", "stop-theft-mode"]
executor_program = "/usr/local/bin/device-exec"
executor_args = ["--quiet"]
executor_timeout_secs = 10

[lockdown]
package = "com.example.locked"

[biometric]
timeout_secs = 15

[logging]
level = "debug"
"#;
    let config = Config::from_toml(toml_str).expect("full config should parse");
    assert_eq!(config.vault.key_alias, "device_key");
    assert_eq!(
        config.gateway.allowed_commands,
        Some(vec![
            "start-theft-mode".to_owned(),
            "stop-theft-mode".to_owned()
        ])
    );
    assert_eq!(
        config.gateway.executor_program.as_deref(),
        Some("/usr/local/bin/device-exec")
    );
    assert_eq!(config.gateway.executor_args, vec!["--quiet".to_owned()]);
    assert_eq!(config.gateway.executor_timeout(), Duration::from_secs(10));
    assert_eq!(config.lockdown.package, "com.example.locked");
    assert_eq!(config.biometric.timeout(), Duration::from_secs(15));
    assert_eq!(config.logging.level, "debug");

    let paths = config.runtime_paths().expect("paths");
    assert_eq!(paths.root, PathBuf::from("/srv/warden"));
    assert_eq!(paths.database, PathBuf::from("/srv/db/warden.db"));
    assert_eq!(paths.keys_dir, PathBuf::from("/srv/warden/keys"));
}

#[test]
fn partial_config_keeps_defaults() {
    let config = Config::from_toml("[lockdown]\npackage = \"x.y\"\n").expect("parse");
    assert_eq!(config.lockdown.package, "x.y");
    assert_eq!(config.vault.key_alias, DEFAULT_KEY_ALIAS);
    assert_eq!(config.gateway.executor_timeout_secs, 30);
}

#[test]
fn wrong_types_are_rejected() {
    assert!(Config::from_toml("[gateway]\nexecutor_timeout_secs = \"ten\"\n").is_err());
    assert!(Config::from_toml("[vault\n").is_err());
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_file(&dir.path().join("absent.toml")).expect("defaults");
    assert_eq!(config.vault.key_alias, DEFAULT_KEY_ALIAS);
}

#[test]
fn invalid_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[logging]\nlevel = 3\n").expect("write");
    let err = Config::load_from_file(&path).expect_err("should fail");
    assert!(format!("{err:#}").contains("config.toml"));
}

#[test]
fn env_overrides_win_over_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[vault]\nkey_alias = \"from_file\"\n[biometric]\ntimeout_secs = 15\n",
    )
    .expect("write");

    let mut config = Config::load_from_file(&path).expect("load");
    config.apply_overrides(|key| match key {
        "WARDEN_KEY_ALIAS" => Some("from_env".to_owned()),
        "WARDEN_DATA_DIR" => Some("/tmp/warden-env".to_owned()),
        "WARDEN_KIOSK_PACKAGE" => Some("env.pkg".to_owned()),
        "WARDEN_EXECUTOR_PROGRAM" => Some("/bin/true".to_owned()),
        "WARDEN_EXECUTOR_TIMEOUT_SECS" => Some("5".to_owned()),
        "WARDEN_LOG_LEVEL" => Some("warn".to_owned()),
        _ => None,
    });

    assert_eq!(config.vault.key_alias, "from_env");
    assert_eq!(config.paths.data_dir, Some(PathBuf::from("/tmp/warden-env")));
    assert_eq!(config.lockdown.package, "env.pkg");
    assert_eq!(config.gateway.executor_program.as_deref(), Some("/bin/true"));
    assert_eq!(config.gateway.executor_timeout_secs, 5);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.biometric.timeout_secs, 15);
}

#[test]
fn default_config_path_is_under_config_dir() {
    let path = Config::config_path_with(|_| None).expect("path");
    assert_eq!(path, config_dir().expect("dir").join("config.toml"));
}
