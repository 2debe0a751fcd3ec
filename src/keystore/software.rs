//! Software stand-in for the hardware key boundary.
//!
//! Keys live either in process memory or as one `0600` file per alias in a
//! `0700` directory. Key bytes are zeroized when dropped and only ever leave
//! this module inside an initialised AES-256-GCM cipher.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{
    CipherContext, CipherDirection, KeyError, KeyHandle, SecureKeyCapability, Sealed, KEY_LEN,
    NONCE_LEN,
};

type KeyBytes = Zeroizing<[u8; KEY_LEN]>;

enum Backend {
    Memory(Mutex<HashMap<String, KeyBytes>>),
    Directory { dir: PathBuf, lock: Mutex<()> },
}

/// Software key capability backed by memory or a private directory.
pub struct SoftwareKeystore {
    backend: Backend,
}

impl std::fmt::Debug for SoftwareKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backend {
            Backend::Memory(_) => "memory".to_owned(),
            Backend::Directory { dir, .. } => dir.display().to_string(),
        };
        f.debug_struct("SoftwareKeystore")
            .field("backend", &kind)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

impl SoftwareKeystore {
    /// Keystore whose keys vanish with the process.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Keystore persisting keys under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unavailable`] if the directory cannot be created
    /// or made private.
    pub fn open(dir: &Path) -> Result<Self, KeyError> {
        fs::create_dir_all(dir).map_err(|e| {
            KeyError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;
        restrict_permissions(dir, 0o700)?;
        Ok(Self {
            backend: Backend::Directory {
                dir: dir.to_path_buf(),
                lock: Mutex::new(()),
            },
        })
    }

    fn load(&self, alias: &str) -> Result<Option<KeyBytes>, KeyError> {
        validate_alias(alias)?;
        match &self.backend {
            Backend::Memory(keys) => {
                let keys = keys
                    .lock()
                    .map_err(|_| KeyError::Unavailable("key table poisoned".to_owned()))?;
                Ok(keys.get(alias).cloned())
            }
            Backend::Directory { dir, .. } => read_key_file(&key_path(dir, alias)),
        }
    }
}

impl SecureKeyCapability for SoftwareKeystore {
    fn contains_key(&self, alias: &str) -> Result<bool, KeyError> {
        Ok(self.load(alias)?.is_some())
    }

    fn ensure_key(&self, alias: &str) -> Result<KeyHandle, KeyError> {
        validate_alias(alias)?;
        match &self.backend {
            Backend::Memory(keys) => {
                let mut keys = keys
                    .lock()
                    .map_err(|_| KeyError::Unavailable("key table poisoned".to_owned()))?;
                if !keys.contains_key(alias) {
                    keys.insert(alias.to_owned(), generate_key());
                    info!(alias, "generated vault key");
                }
            }
            Backend::Directory { dir, lock } => {
                let _guard = lock
                    .lock()
                    .map_err(|_| KeyError::Unavailable("key lock poisoned".to_owned()))?;
                let path = key_path(dir, alias);
                if read_key_file(&path)?.is_none() {
                    write_key_file(&path, &generate_key())?;
                    info!(alias, "generated vault key");
                }
            }
        }
        Ok(KeyHandle::new(alias))
    }

    fn new_cipher(
        &self,
        handle: &KeyHandle,
        direction: CipherDirection,
    ) -> Result<Box<dyn CipherContext>, KeyError> {
        let key = self
            .load(handle.alias())?
            .ok_or_else(|| KeyError::NotFound(handle.alias().to_owned()))?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|_| KeyError::Unavailable("key material has wrong length".to_owned()))?;
        debug!(alias = handle.alias(), ?direction, "cipher context created");
        Ok(Box::new(GcmContext {
            cipher,
            direction,
            alias: handle.alias().to_owned(),
        }))
    }
}

/// AES-256-GCM context bound to one direction.
struct GcmContext {
    cipher: Aes256Gcm,
    direction: CipherDirection,
    alias: String,
}

impl GcmContext {
    fn require(&self, expected: CipherDirection) -> Result<(), KeyError> {
        if self.direction == expected {
            Ok(())
        } else {
            Err(KeyError::WrongDirection {
                expected,
                actual: self.direction,
            })
        }
    }
}

impl CipherContext for GcmContext {
    fn direction(&self) -> CipherDirection {
        self.direction
    }

    fn key_alias(&self) -> &str {
        &self.alias
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Sealed, KeyError> {
        self.require(CipherDirection::Encrypt)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| KeyError::SealFailed)?;
        Ok(Sealed { nonce, ciphertext })
    }

    fn open(&mut self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
        self.require(CipherDirection::Decrypt)?;
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeyError::TagMismatch)
    }
}

fn generate_key() -> KeyBytes {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

/// Aliases become file names, so only a conservative charset is accepted.
fn validate_alias(alias: &str) -> Result<(), KeyError> {
    let valid = !alias.is_empty()
        && !alias.starts_with('.')
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidAlias(alias.to_owned()))
    }
}

fn key_path(dir: &Path, alias: &str) -> PathBuf {
    dir.join(format!("{alias}.key"))
}

fn read_key_file(path: &Path) -> Result<Option<KeyBytes>, KeyError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => Zeroizing::new(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(KeyError::Unavailable(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };
    if bytes.len() != KEY_LEN {
        return Err(KeyError::Unavailable(format!(
            "key file {} is corrupt",
            path.display()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&bytes);
    Ok(Some(key))
}

/// Write to a temp file, then hard-link it into place so an existing key is
/// never overwritten and a crash never leaves a truncated key.
fn write_key_file(path: &Path, key: &KeyBytes) -> Result<(), KeyError> {
    let unavailable = |what: &str, e: std::io::Error| {
        KeyError::Unavailable(format!("{what} {}: {e}", path.display()))
    };
    let tmp = path.with_extension("key.tmp");

    // A leftover from an interrupted write may have other permissions.
    let _ = fs::remove_file(&tmp);
    let written = private_file(&tmp)
        .and_then(|mut file| file.write_all(key.as_slice()).and_then(|()| file.sync_all()));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(unavailable("cannot write", e));
    }
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(unavailable("cannot install", e)),
    }
}

/// Create `path` exclusively, readable by the owner only from the start.
#[cfg(unix)]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        KeyError::Unavailable(format!(
            "cannot set permissions on {}: {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), KeyError> {
    Ok(())
}
