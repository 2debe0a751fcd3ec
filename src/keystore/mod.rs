//! Secure key capability: non-exportable AES-256-GCM keys behind an alias.
//!
//! Callers never see key bytes. They obtain a [`KeyHandle`] for an alias and
//! ask for a [`CipherContext`] configured for one [`CipherDirection`]. A
//! context can only do what its direction allows, so a proof made with a
//! decrypt context really exercises the decrypt path.

pub mod software;

pub use software::SoftwareKeystore;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Errors produced at the key boundary.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The key store cannot be reached or its material is unusable.
    #[error("key boundary unavailable: {0}")]
    Unavailable(String),
    /// No key exists for the alias.
    #[error("no key with alias {0}")]
    NotFound(String),
    /// The alias contains characters the key store does not accept.
    #[error("invalid key alias: {0}")]
    InvalidAlias(String),
    /// The context was used against its configured direction.
    #[error("cipher context configured for {actual:?}, not {expected:?}")]
    WrongDirection {
        /// Direction the operation needs.
        expected: CipherDirection,
        /// Direction the context was created with.
        actual: CipherDirection,
    },
    /// Decryption rejected the authentication tag.
    #[error("authentication tag did not verify")]
    TagMismatch,
    /// The cipher refused to encrypt.
    #[error("encryption failed")]
    SealFailed,
}

/// Opaque handle to a key held by a [`SecureKeyCapability`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    alias: String,
}

impl KeyHandle {
    /// Wrap an alias. Only key capabilities should mint handles.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }

    /// Alias identifying the key.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Operation a [`CipherContext`] is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    /// Produces nonce and ciphertext from plaintext.
    Encrypt,
    /// Verifies the tag and recovers plaintext.
    Decrypt,
}

/// Output of [`CipherContext::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Fresh random nonce used for this encryption.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext followed by the 16-byte tag.
    pub ciphertext: Vec<u8>,
}

/// A cipher bound to one key and one direction.
pub trait CipherContext: Send {
    /// Direction this context was created for.
    fn direction(&self) -> CipherDirection;

    /// Alias of the key this context uses.
    fn key_alias(&self) -> &str;

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// [`KeyError::WrongDirection`] on a decrypt context,
    /// [`KeyError::SealFailed`] if the cipher refuses.
    fn seal(&mut self, plaintext: &[u8]) -> Result<Sealed, KeyError>;

    /// Verify and decrypt `ciphertext` (which ends with the tag).
    ///
    /// # Errors
    ///
    /// [`KeyError::WrongDirection`] on an encrypt context,
    /// [`KeyError::TagMismatch`] when authentication fails.
    fn open(&mut self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, KeyError>;
}

/// Hardware-backed key store boundary.
pub trait SecureKeyCapability: Send + Sync {
    /// Whether a key exists for `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unavailable`] if the store cannot be reached.
    fn contains_key(&self, alias: &str) -> Result<bool, KeyError>;

    /// Return the key for `alias`, generating it only if absent.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unavailable`] if the store cannot be reached or
    /// generation fails.
    fn ensure_key(&self, alias: &str) -> Result<KeyHandle, KeyError>;

    /// Create a cipher context bound to `handle` for `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NotFound`] if the key vanished, or
    /// [`KeyError::Unavailable`] if it cannot be loaded.
    fn new_cipher(
        &self,
        handle: &KeyHandle,
        direction: CipherDirection,
    ) -> Result<Box<dyn CipherContext>, KeyError>;
}
