//! Remote command gateway.
//!
//! Inbound messages are plaintext, whitespace-delimited, and arrive over a
//! transport with no sender authentication. Token 0 is the candidate secret,
//! the rest is argv. Possession of the secret is the only proof of authority.
//! Nothing is ever sent back on the transport: every outcome, including
//! drops, ends as a local log entry.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::executor::{Command, CommandExecutor, ExecOutcome, ExecutorError};
use crate::vault::{CredentialVault, VaultError};

/// Reasons an inbound message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The message has no tokens.
    #[error("message has no tokens")]
    MalformedMessage,
    /// The embedded secret does not match the stored credential.
    #[error("secret mismatch")]
    SecretMismatch,
    /// No credential is configured, so nothing is authorizable.
    #[error("no credential configured")]
    NotConfigured,
    /// The vault could not complete verification.
    #[error("vault failure: {0}")]
    VaultFailure(String),
    /// The command is not in the configured allow-list.
    #[error("command not permitted: {0}")]
    CommandNotPermitted(String),
}

/// What the gateway did with one message.
#[derive(Debug)]
pub enum Disposition {
    /// The argv was handed to the executor; carries its result.
    Forwarded(Result<ExecOutcome, ExecutorError>),
    /// The message was dropped.
    Dropped(GatewayError),
}

impl Disposition {
    /// Whether the executor was invoked.
    pub fn was_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded(_))
    }
}

/// Split an inbound body into `(secret, argv)`.
///
/// # Errors
///
/// [`GatewayError::MalformedMessage`] when the body has no tokens.
pub fn parse_message(raw: &str) -> Result<(&str, Vec<String>), GatewayError> {
    let mut tokens = raw.split_whitespace();
    let secret = tokens.next().ok_or(GatewayError::MalformedMessage)?;
    Ok((secret, tokens.map(str::to_owned).collect()))
}

/// Authorizes inbound messages against the vault and forwards argv.
pub struct RemoteCommandGateway {
    vault: Arc<CredentialVault>,
    executor: Arc<dyn CommandExecutor>,
    allowed_commands: Option<Vec<String>>,
}

impl std::fmt::Debug for RemoteCommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCommandGateway")
            .field("allowed_commands", &self.allowed_commands)
            .finish_non_exhaustive()
    }
}

impl RemoteCommandGateway {
    /// Create a gateway that forwards any authorized argv.
    pub fn new(vault: Arc<CredentialVault>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            vault,
            executor,
            allowed_commands: None,
        }
    }

    /// Restrict forwarding to argv whose first token is in `commands`.
    #[must_use]
    pub fn with_allowed_commands(mut self, commands: Option<Vec<String>>) -> Self {
        self.allowed_commands = commands;
        self
    }

    /// Process one inbound message. Never fails: drops are reported in the
    /// returned [`Disposition`] and the local log only.
    pub async fn handle(&self, raw: &str) -> Disposition {
        let message_id = Uuid::new_v4();
        match self.authorize(raw).await {
            Ok(command) => {
                info!(%message_id, argc = command.argv().len(), "forwarding authorized command");
                let result = self.executor.run(command).await;
                match &result {
                    Ok(outcome) => info!(
                        %message_id,
                        exit_code = ?outcome.exit_code,
                        success = outcome.success(),
                        "forwarded command finished"
                    ),
                    Err(e) => warn!(%message_id, error = %e, "forwarded command failed"),
                }
                Disposition::Forwarded(result)
            }
            Err(reason) => {
                info!(%message_id, reason = %reason, "inbound message dropped");
                Disposition::Dropped(reason)
            }
        }
    }

    async fn authorize(&self, raw: &str) -> Result<Command, GatewayError> {
        let (secret, argv) = parse_message(raw)?;

        match self.vault.verify_credential(secret).await {
            Ok(true) => {}
            Ok(false) => return Err(GatewayError::SecretMismatch),
            Err(VaultError::VaultEmpty) => return Err(GatewayError::NotConfigured),
            Err(e) => return Err(GatewayError::VaultFailure(e.to_string())),
        }

        let command = Command::new(argv);
        if let Some(allowed) = &self.allowed_commands {
            let name = command.name().unwrap_or_default();
            if command.is_empty() || !allowed.iter().any(|c| c == name) {
                return Err(GatewayError::CommandNotPermitted(name.to_owned()));
            }
        }
        Ok(command)
    }
}
