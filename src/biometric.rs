//! Biometric shortcut for credential verification.
//!
//! The sensor ceremony is handed a decrypt-direction cipher bound to the
//! vault key and returns it once the user is authenticated. The gate then
//! opens the stored blob with that context: a verified tag proves the
//! ceremony unlocked the same key that protects the credential, which is
//! what makes the biometric path equivalent to a successful verify.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::keystore::{CipherContext, CipherDirection};
use crate::vault::{open_with, CredentialVault, VaultError};

/// Result delivered by the sensor: the authenticated context or a reason.
pub type SensorResult = Result<Box<dyn CipherContext>, String>;

/// Biometric sensor boundary.
pub trait BiometricCapability: Send + Sync {
    /// Whether sensor hardware exists.
    fn hardware_present(&self) -> bool;

    /// Whether at least one biometric is enrolled.
    fn has_enrollment(&self) -> bool;

    /// Start the ceremony. Must return promptly; the result is sent on
    /// `reply` later, or never if the ceremony is abandoned.
    fn authenticate(&self, cipher: Box<dyn CipherContext>, reply: oneshot::Sender<SensorResult>);
}

/// Biometric failures.
#[derive(Debug, thiserror::Error)]
pub enum BiometricError {
    /// No sensor hardware.
    #[error("biometric hardware unavailable")]
    SensorUnavailable,
    /// Hardware present but nothing enrolled.
    #[error("no biometric enrolled")]
    NoEnrollment,
    /// The sensor rejected the user or returned an unusable context.
    #[error("biometric authentication failed: {0}")]
    AuthFailed(String),
    /// No result within the timeout.
    #[error("biometric authentication timed out after {seconds}s")]
    TimedOut {
        /// Timeout budget in seconds.
        seconds: u64,
    },
    /// The vault could not provide or check the credential.
    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl BiometricError {
    /// Generic text for interactive surfaces.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::SensorUnavailable => "Fingerprint hardware is not available",
            Self::NoEnrollment => "No fingerprint is enrolled",
            Self::AuthFailed(_) | Self::TimedOut { .. } => "Authentication failed",
            Self::Vault(e) => e.user_message(),
        }
    }
}

/// Runs the biometric ceremony against the vault key.
pub struct BiometricGate {
    sensor: Arc<dyn BiometricCapability>,
    vault: Arc<CredentialVault>,
    timeout: Duration,
}

impl std::fmt::Debug for BiometricGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricGate")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BiometricGate {
    /// Create a gate that waits at most `timeout` for the sensor.
    pub fn new(
        sensor: Arc<dyn BiometricCapability>,
        vault: Arc<CredentialVault>,
        timeout: Duration,
    ) -> Self {
        Self {
            sensor,
            vault,
            timeout,
        }
    }

    /// Authenticate the user and prove possession of the vault key.
    ///
    /// # Errors
    ///
    /// [`BiometricError::SensorUnavailable`], [`BiometricError::NoEnrollment`],
    /// [`BiometricError::AuthFailed`] if the sensor fails, drops the reply or
    /// returns a context that cannot open the blob,
    /// [`BiometricError::TimedOut`], and [`BiometricError::Vault`] when no
    /// credential is stored or the key is unavailable.
    pub async fn authenticate(&self) -> Result<(), BiometricError> {
        if !self.sensor.hardware_present() {
            return Err(BiometricError::SensorUnavailable);
        }
        if !self.sensor.has_enrollment() {
            return Err(BiometricError::NoEnrollment);
        }

        let blob = self.vault.stored_blob().await?;
        let cipher = self.vault.verification_cipher()?;

        let (reply, result) = oneshot::channel();
        self.sensor.authenticate(cipher, reply);

        let mut context = match tokio::time::timeout(self.timeout, result).await {
            Err(_) => {
                warn!("biometric ceremony timed out");
                return Err(BiometricError::TimedOut {
                    seconds: self.timeout.as_secs(),
                });
            }
            Ok(Err(_)) => {
                return Err(BiometricError::AuthFailed("sensor abandoned the ceremony".to_owned()))
            }
            Ok(Ok(Err(reason))) => return Err(BiometricError::AuthFailed(reason)),
            Ok(Ok(Ok(context))) => context,
        };

        if context.direction() != CipherDirection::Decrypt {
            warn!("sensor returned an encrypt-direction context");
            return Err(BiometricError::AuthFailed(
                "context is not bound to decryption".to_owned(),
            ));
        }
        if context.key_alias() != self.vault.alias() {
            return Err(BiometricError::AuthFailed(
                "context is bound to a different key".to_owned(),
            ));
        }

        match open_with(context.as_mut(), &blob) {
            Ok(_credential) => {
                info!("biometric authentication succeeded");
                Ok(())
            }
            Err(VaultError::AuthFailure) => {
                warn!("stored credential failed authentication during biometric unlock");
                Err(BiometricError::Vault(VaultError::AuthFailure))
            }
            Err(e) => Err(BiometricError::AuthFailed(e.to_string())),
        }
    }
}

/// Sensor for hosts without biometric hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSensor;

impl BiometricCapability for NoSensor {
    fn hardware_present(&self) -> bool {
        false
    }

    fn has_enrollment(&self) -> bool {
        false
    }

    fn authenticate(&self, _cipher: Box<dyn CipherContext>, reply: oneshot::Sender<SensorResult>) {
        let _ = reply.send(Err("no biometric hardware".to_owned()));
    }
}
