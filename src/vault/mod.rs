//! Credential vault: one secret, AES-256-GCM encrypted at rest.
//!
//! The vault holds only the key alias. Encryption goes through an
//! encrypt-direction [`CipherContext`], decryption through a decrypt-direction
//! one, both minted by the injected [`SecureKeyCapability`]. Every read and
//! write of the stored blob runs under one async mutex, so a concurrent
//! change and verification never interleave.

pub mod blob;
pub mod credential;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::keystore::{CipherContext, CipherDirection, KeyError, KeyHandle, SecureKeyCapability};
use crate::store::{KeyValueStore, StoreError};

pub use blob::EncryptedBlob;
pub use credential::{secrets_equal, Credential};

/// Store key holding the base64 blob. Absence means no credential is set.
pub const CREDENTIAL_KEY: &str = "credential.blob";

/// Vault error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The key boundary cannot be reached or the key is unusable.
    #[error("vault key unavailable: {0}")]
    KeyUnavailable(String),
    /// No credential is stored.
    #[error("no credential configured")]
    VaultEmpty,
    /// The stored blob failed authentication (tamper or corruption).
    #[error("stored credential failed authentication")]
    AuthFailure,
    /// The stored value is not a decodable blob.
    #[error("stored credential is malformed")]
    MalformedBlob,
    /// Password and confirmation differ, or a field is empty.
    #[error("password and confirmation do not match")]
    NoMatch,
    /// The current password given to a change was wrong.
    #[error("current password is incorrect")]
    WrongCurrent,
    /// A credential is already stored; use change instead.
    #[error("a credential is already configured")]
    AlreadyConfigured,
    /// The credential store failed.
    #[error("credential store failed: {0}")]
    Storage(#[from] StoreError),
}

impl VaultError {
    /// Generic text for interactive surfaces. Internal causes stay in logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoMatch => "Passwords do not match!",
            Self::WrongCurrent => "Incorrect Password",
            Self::AlreadyConfigured => "A password is already set",
            Self::VaultEmpty => "No password has been set",
            Self::KeyUnavailable(_)
            | Self::AuthFailure
            | Self::MalformedBlob
            | Self::Storage(_) => "Failed to verify password",
        }
    }
}

fn key_failure(err: KeyError) -> VaultError {
    match err {
        KeyError::TagMismatch => VaultError::AuthFailure,
        other => VaultError::KeyUnavailable(other.to_string()),
    }
}

/// The credential vault.
pub struct CredentialVault {
    keys: Arc<dyn SecureKeyCapability>,
    store: Arc<dyn KeyValueStore>,
    alias: String,
    lock: Mutex<()>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Create a vault over a key capability and a credential store.
    pub fn new(
        keys: Arc<dyn SecureKeyCapability>,
        store: Arc<dyn KeyValueStore>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            store,
            alias: alias.into(),
            lock: Mutex::new(()),
        }
    }

    /// Alias of the vault key.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Generate the vault key if its alias is absent. Idempotent.
    ///
    /// # Errors
    ///
    /// [`VaultError::KeyUnavailable`] if the key boundary cannot be reached.
    pub fn ensure_key(&self) -> Result<KeyHandle, VaultError> {
        self.keys.ensure_key(&self.alias).map_err(key_failure)
    }

    /// Whether a credential blob is stored.
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] if the store cannot be read.
    pub async fn has_credential(&self) -> Result<bool, VaultError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.get(CREDENTIAL_KEY).await?.is_some())
    }

    /// Store the first credential.
    ///
    /// # Errors
    ///
    /// [`VaultError::NoMatch`] if either field is empty or they differ,
    /// [`VaultError::AlreadyConfigured`] if a credential exists, plus key
    /// and storage failures. State is unchanged on every error.
    pub async fn set_credential(
        &self,
        password: &str,
        confirmation: &str,
    ) -> Result<(), VaultError> {
        check_new_password(password, confirmation)?;

        let _guard = self.lock.lock().await;
        if self.store.get(CREDENTIAL_KEY).await?.is_some() {
            debug!("set rejected: credential already configured");
            return Err(VaultError::AlreadyConfigured);
        }

        let blob = self.encrypt(password)?;
        self.store
            .put(CREDENTIAL_KEY, blob.encode().into_bytes())
            .await?;
        info!("credential configured");
        Ok(())
    }

    /// Check `candidate` against the stored credential.
    ///
    /// # Errors
    ///
    /// [`VaultError::VaultEmpty`] if nothing is stored,
    /// [`VaultError::AuthFailure`] if the blob was tampered with,
    /// [`VaultError::MalformedBlob`] if it cannot be parsed.
    pub async fn verify_credential(&self, candidate: &str) -> Result<bool, VaultError> {
        let _guard = self.lock.lock().await;
        self.verify_locked(candidate).await
    }

    /// Replace the credential after verifying the current one.
    ///
    /// # Errors
    ///
    /// [`VaultError::NoMatch`] for empty fields or a confirmation mismatch,
    /// [`VaultError::WrongCurrent`] if `current` is wrong, plus every
    /// [`verify_credential`](Self::verify_credential) error. The stored
    /// credential is untouched on every error.
    pub async fn change_credential(
        &self,
        current: &str,
        new_password: &str,
        confirmation: &str,
    ) -> Result<(), VaultError> {
        if current.is_empty() {
            return Err(VaultError::NoMatch);
        }
        check_new_password(new_password, confirmation)?;

        let _guard = self.lock.lock().await;
        if !self.verify_locked(current).await? {
            info!("credential change rejected: wrong current credential");
            return Err(VaultError::WrongCurrent);
        }

        let blob = self.encrypt(new_password)?;
        self.store
            .put(CREDENTIAL_KEY, blob.encode().into_bytes())
            .await?;
        info!("credential changed");
        Ok(())
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// [`VaultError::KeyUnavailable`] if the key cannot be used.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob, VaultError> {
        let handle = self.ensure_key()?;
        let mut cipher = self
            .keys
            .new_cipher(&handle, CipherDirection::Encrypt)
            .map_err(key_failure)?;
        let sealed = cipher.seal(plaintext.as_bytes()).map_err(key_failure)?;
        Ok(EncryptedBlob::from(sealed))
    }

    /// Authenticate and decrypt `blob`.
    ///
    /// # Errors
    ///
    /// [`VaultError::AuthFailure`] when the tag does not verify.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Credential, VaultError> {
        let mut cipher = self.verification_cipher()?;
        open_with(cipher.as_mut(), blob)
    }

    /// Decrypt-direction context bound to the vault key.
    ///
    /// Used as the proof object of the biometric ceremony.
    ///
    /// # Errors
    ///
    /// [`VaultError::KeyUnavailable`] if the key cannot be used.
    pub fn verification_cipher(&self) -> Result<Box<dyn CipherContext>, VaultError> {
        let handle = self.ensure_key()?;
        self.keys
            .new_cipher(&handle, CipherDirection::Decrypt)
            .map_err(key_failure)
    }

    /// Read the stored blob.
    ///
    /// # Errors
    ///
    /// [`VaultError::VaultEmpty`] if nothing is stored,
    /// [`VaultError::MalformedBlob`] if it cannot be parsed.
    pub async fn stored_blob(&self) -> Result<EncryptedBlob, VaultError> {
        let _guard = self.lock.lock().await;
        self.load_blob().await
    }

    async fn load_blob(&self) -> Result<EncryptedBlob, VaultError> {
        let raw = self
            .store
            .get(CREDENTIAL_KEY)
            .await?
            .ok_or(VaultError::VaultEmpty)?;
        let text = std::str::from_utf8(&raw).map_err(|_| VaultError::MalformedBlob)?;
        EncryptedBlob::decode(text)
    }

    async fn verify_locked(&self, candidate: &str) -> Result<bool, VaultError> {
        let blob = self.load_blob().await?;
        let stored = self.decrypt(&blob).inspect_err(|e| {
            if matches!(e, VaultError::AuthFailure) {
                warn!("stored credential failed authentication");
            }
        })?;
        Ok(stored.matches(candidate))
    }
}

/// Decrypt `blob` through an already authorised decrypt context.
///
/// # Errors
///
/// [`VaultError::AuthFailure`] on tag mismatch, [`VaultError::KeyUnavailable`]
/// if the context has the wrong direction.
pub fn open_with(
    cipher: &mut dyn CipherContext,
    blob: &EncryptedBlob,
) -> Result<Credential, VaultError> {
    let plaintext = cipher
        .open(blob.nonce(), blob.ciphertext())
        .map_err(key_failure)?;
    String::from_utf8(plaintext)
        .map(Credential::new)
        .map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            VaultError::MalformedBlob
        })
}

fn check_new_password(password: &str, confirmation: &str) -> Result<(), VaultError> {
    if password.is_empty()
        || confirmation.is_empty()
        || !secrets_equal(password.as_bytes(), confirmation.as_bytes())
    {
        return Err(VaultError::NoMatch);
    }
    Ok(())
}
