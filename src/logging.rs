//! Log output for the warden binary.
//!
//! One-shot commands (`password`, `lockdown`, `biometric`) log to stderr
//! only, so their stdout stays a clean answer for scripts. The long-running
//! `listen` loop also keeps a daily JSON file under the logs directory,
//! which is the only record of why an inbound message was dropped: the
//! gateway never replies to the sender.
//!
//! Credential material is never passed as a log field. Gateway entries
//! carry a message id and a drop reason.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the listener's rotated log, `warden.log.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "warden.log";

/// Keeps the listener's file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// `RUST_LOG` when set, the configured level otherwise.
fn env_filter(configured_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level))
}

/// Install logging for `warden listen`.
///
/// JSON goes to `{logs_dir}/warden.log.YYYY-MM-DD`, plain text to stderr.
///
/// # Errors
///
/// Fails if `logs_dir` cannot be created or another subscriber is already
/// installed.
pub fn init_production(logs_dir: &Path, configured_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter(configured_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::debug!(logs_dir = %logs_dir.display(), "listener logging ready");
    Ok(LoggingGuard { _guard: guard })
}

/// Install stderr-only logging for one-shot commands.
///
/// A subscriber that is already installed is kept.
pub fn init_cli(configured_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(configured_level))
        .with_writer(std::io::stderr)
        .try_init();
}
