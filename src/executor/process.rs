//! Executor that hands argv to an external program.
//!
//! Tokens are passed as discrete arguments, never through a shell.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Command, CommandExecutor, ExecOutcome, ExecutorError};

/// Runs `program [prefix_args...] argv...` with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    prefix_args: Vec<String>,
    timeout: Duration,
}

impl ProcessExecutor {
    /// Create an executor for `program`.
    pub fn new(program: impl Into<String>, prefix_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            prefix_args,
            timeout,
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, command: Command) -> Result<ExecOutcome, ExecutorError> {
        let started = Instant::now();
        let mut child = tokio::process::Command::new(&self.program);
        child
            .args(&self.prefix_args)
            .args(command.into_argv())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, child.output()).await {
            Ok(result) => result.map_err(|e| {
                ExecutorError::Infrastructure(format!("failed to spawn {}: {e}", self.program))
            })?,
            Err(_) => {
                warn!(program = %self.program, "forwarded command timed out");
                return Err(ExecutorError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let outcome = ExecOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };
        debug!(
            program = %self.program,
            exit_code = ?outcome.exit_code,
            duration_ms = u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            "forwarded command finished"
        );
        Ok(outcome)
    }
}
