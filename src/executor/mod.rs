//! Command execution boundary for authorized remote commands.
//!
//! The gateway hands each authorized [`Command`] by value to a
//! [`CommandExecutor`]. Interpreting the argv is the executor's business.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

pub mod process;

pub use process::ProcessExecutor;

/// Ordered argv extracted from an authorized inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    /// Build a command from argv tokens.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Borrow the argv.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Take ownership of the argv.
    pub fn into_argv(self) -> Vec<String> {
        self.argv
    }

    /// First token, the command name.
    pub fn name(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Tokens after the command name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Whether the argv has no tokens.
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Result of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit code (`None` when the process was killed or there is no process).
    pub exit_code: Option<i32>,
    /// Captured stdout text.
    pub stdout: String,
    /// Captured stderr text.
    pub stderr: String,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
}

impl ExecOutcome {
    /// Successful in-process completion with a message on stdout.
    pub fn completed(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Returns `true` when the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors produced by executors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executor could not start or observe the command.
    #[error("executor operation failed: {0}")]
    Infrastructure(String),
    /// Command execution exceeded its timeout.
    #[error("command timed out after {seconds}s")]
    Timeout {
        /// Timeout budget in seconds.
        seconds: u64,
    },
    /// The command was recognised but could not be carried out.
    #[error("command failed: {0}")]
    Failed(String),
}

/// Consumer of authorized argv.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command`. Called exactly once per authorized message.
    async fn run(&self, command: Command) -> Result<ExecOutcome, ExecutorError>;
}

/// Executor that only records the command in the local log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExecutor;

#[async_trait]
impl CommandExecutor for LogExecutor {
    async fn run(&self, command: Command) -> Result<ExecOutcome, ExecutorError> {
        info!(argc = command.argv().len(), command = %command, "command received, no executor program configured");
        Ok(ExecOutcome::completed(String::new()))
    }
}
