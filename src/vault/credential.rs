//! In-memory credential values and secret comparison.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Decrypted credential. Zeroized on drop, never printed.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    /// Wrap a plaintext credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Expose the plaintext. Only for re-encryption and comparison.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare against `candidate` without early exit on length or content.
    pub fn matches(&self, candidate: &str) -> bool {
        secrets_equal(self.expose().as_bytes(), candidate.as_bytes())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Constant-time equality over SHA-256 digests of both sides.
///
/// Hashing first makes the compared inputs fixed-length, so neither the
/// position of the first differing byte nor a length mismatch shortens the
/// comparison.
pub fn secrets_equal(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    da.as_slice().ct_eq(db.as_slice()).into()
}
