//! Stored form of the encrypted credential.
//!
//! Layout: `nonce (12) || ciphertext || tag (16)`, base64 encoded for the
//! key-value store.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::VaultError;
use crate::keystore::{Sealed, NONCE_LEN};

/// Nonce-prefixed AES-GCM output for one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Nonce used for this encryption.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ciphertext including the trailing tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Concatenate into the stored byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NONCE_LEN.saturating_add(self.ciphertext.len()));
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Split a stored byte layout.
    ///
    /// # Errors
    ///
    /// [`VaultError::MalformedBlob`] when shorter than the nonce.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        if bytes.len() < NONCE_LEN {
            return Err(VaultError::MalformedBlob);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Base64 text for storage.
    pub fn encode(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parse base64 text. Embedded whitespace and line breaks are ignored.
    ///
    /// # Errors
    ///
    /// [`VaultError::MalformedBlob`] for invalid base64 or a short payload.
    pub fn decode(text: &str) -> Result<Self, VaultError> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|_| VaultError::MalformedBlob)?;
        Self::from_bytes(&bytes)
    }
}

impl From<Sealed> for EncryptedBlob {
    fn from(sealed: Sealed) -> Self {
        Self {
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        }
    }
}
