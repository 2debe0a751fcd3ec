//! Configuration loading and path resolution.
//!
//! Loads `config.toml` from `$WARDEN_CONFIG_PATH` or `~/.warden/config.toml`.
//! A missing file yields defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default alias of the vault key inside the key capability.
pub const DEFAULT_KEY_ALIAS: &str = "warden_vault_key_v1";

/// Default package pinned by the lockdown when none is given.
pub const DEFAULT_KIOSK_PACKAGE: &str = "dev.warden.kiosk";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations for persistent state.
    pub paths: PathsConfig,
    /// Credential vault settings.
    pub vault: VaultConfig,
    /// Remote command gateway settings.
    pub gateway: GatewayConfig,
    /// Kiosk lockdown settings.
    pub lockdown: LockdownConfig,
    /// Biometric gate settings.
    pub biometric: BiometricConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the home directory cannot be determined.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok())?;
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if no override is set and the home directory cannot
    /// be determined.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env("WARDEN_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(config_dir()?.join("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("WARDEN_DATA_DIR") {
            self.paths.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("WARDEN_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("WARDEN_KEY_ALIAS") {
            self.vault.key_alias = v;
        }
        if let Some(v) = env("WARDEN_KIOSK_PACKAGE") {
            self.lockdown.package = v;
        }
        if let Some(v) = env("WARDEN_EXECUTOR_PROGRAM") {
            self.gateway.executor_program = Some(v);
        }
        parse_override(
            &env,
            "WARDEN_EXECUTOR_TIMEOUT_SECS",
            &mut self.gateway.executor_timeout_secs,
        );
        parse_override(
            &env,
            "WARDEN_BIOMETRIC_TIMEOUT_SECS",
            &mut self.biometric.timeout_secs,
        );
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrong field types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Resolve every runtime path, filling unset entries from the data dir.
    ///
    /// # Errors
    ///
    /// Returns an error if no data dir is configured and the home directory
    /// cannot be determined.
    pub fn runtime_paths(&self) -> Result<RuntimePaths> {
        let root = match &self.paths.data_dir {
            Some(dir) => dir.clone(),
            None => config_dir()?,
        };
        Ok(RuntimePaths {
            database: self
                .paths
                .database
                .clone()
                .unwrap_or_else(|| root.join("warden.db")),
            keys_dir: self
                .paths
                .keys_dir
                .clone()
                .unwrap_or_else(|| root.join("keys")),
            device_state: self
                .paths
                .device_state
                .clone()
                .unwrap_or_else(|| root.join("device.json")),
            logs_dir: self
                .paths
                .logs_dir
                .clone()
                .unwrap_or_else(|| root.join("logs")),
            root,
        })
    }
}

fn parse_override(env: &impl Fn(&str) -> Option<String>, var: &'static str, slot: &mut u64) {
    if let Some(v) = env(var) {
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!(var, value = %v, "ignoring invalid env override"),
        }
    }
}

/// Resolve the default config directory (`~/.warden/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".warden"))
}

/// Fully resolved filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Root data directory.
    pub root: PathBuf,
    /// SQLite database holding the credential and lockdown stores.
    pub database: PathBuf,
    /// Directory of the software key capability.
    pub keys_dir: PathBuf,
    /// JSON file of the simulated device policy service.
    pub device_state: PathBuf,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
}

// ── Sections ────────────────────────────────────────────────────

/// Filesystem paths. Unset entries are derived from `data_dir`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root data directory (default `~/.warden`).
    pub data_dir: Option<PathBuf>,
    /// SQLite database path.
    pub database: Option<PathBuf>,
    /// Key directory path.
    pub keys_dir: Option<PathBuf>,
    /// Simulated device state path.
    pub device_state: Option<PathBuf>,
    /// Logs directory path.
    pub logs_dir: Option<PathBuf>,
}

/// Credential vault settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Alias of the vault key inside the key capability.
    pub key_alias: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_alias: DEFAULT_KEY_ALIAS.to_owned(),
        }
    }
}

/// Remote command gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// First-token allow-list for forwarded commands. `None` forwards any argv.
    pub allowed_commands: Option<Vec<String>>,
    /// Program that receives forwarded argv. `None` only logs the command.
    pub executor_program: Option<String>,
    /// Arguments placed before the forwarded argv.
    pub executor_args: Vec<String>,
    /// Upper bound on a single forwarded command.
    pub executor_timeout_secs: u64,
}

impl GatewayConfig {
    /// Executor timeout as a [`Duration`].
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_commands: None,
            executor_program: None,
            executor_args: Vec::new(),
            executor_timeout_secs: 30,
        }
    }
}

/// Kiosk lockdown settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockdownConfig {
    /// Package pinned when a lockdown request names none.
    pub package: String,
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            package: DEFAULT_KIOSK_PACKAGE.to_owned(),
        }
    }
}

/// Biometric gate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BiometricConfig {
    /// Upper bound on waiting for a sensor result.
    pub timeout_secs: u64,
}

impl BiometricConfig {
    /// Sensor timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BiometricConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
