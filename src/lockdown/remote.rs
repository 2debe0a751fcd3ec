//! Remote lockdown commands.
//!
//! `start-theft-mode [package]` enters lockdown and `stop-theft-mode`
//! leaves it. Any other argv goes to the wrapped executor untouched.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{EntryKind, LockdownController};
use crate::executor::{Command, CommandExecutor, ExecOutcome, ExecutorError};

/// Command name that enters lockdown.
pub const START_THEFT_MODE: &str = "start-theft-mode";

/// Command name that exits lockdown.
pub const STOP_THEFT_MODE: &str = "stop-theft-mode";

/// Executor that handles lockdown commands itself.
pub struct LockdownExecutor {
    controller: Arc<LockdownController>,
    inner: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for LockdownExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockdownExecutor")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl LockdownExecutor {
    /// Wrap `inner`, intercepting lockdown commands for `controller`.
    pub fn new(controller: Arc<LockdownController>, inner: Arc<dyn CommandExecutor>) -> Self {
        Self { controller, inner }
    }
}

#[async_trait]
impl CommandExecutor for LockdownExecutor {
    async fn run(&self, command: Command) -> Result<ExecOutcome, ExecutorError> {
        let started = Instant::now();
        let mut outcome = match command.name() {
            Some(START_THEFT_MODE) => {
                let package = command
                    .args()
                    .first()
                    .map_or(self.controller.default_package(), String::as_str);
                let kind = self
                    .controller
                    .enter(package)
                    .await
                    .map_err(|e| ExecutorError::Failed(e.to_string()))?;
                ExecOutcome::completed(match kind {
                    EntryKind::Engaged => format!("theft mode engaged for {package}"),
                    EntryKind::Reasserted => "theft mode already active, re-asserted".to_owned(),
                })
            }
            Some(STOP_THEFT_MODE) => {
                self.controller
                    .exit()
                    .await
                    .map_err(|e| ExecutorError::Failed(e.to_string()))?;
                ExecOutcome::completed("theft mode released")
            }
            _ => return self.inner.run(command).await,
        };
        outcome.duration = started.elapsed();
        Ok(outcome)
    }
}
