//! Durable key-value storage shared by the vault and the lockdown controller.
//!
//! Each consumer gets its own namespace, so the credential store and the
//! lockdown store are independent even when they share one database file.
//! Booleans are encoded as a single byte. Multi-key updates go through
//! [`KeyValueStore::commit`], which is all-or-nothing.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::{open_database, SqliteStore};

/// Errors produced by key-value stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
    /// A stored value does not decode as the requested type.
    #[error("stored value for {key} has an unexpected encoding")]
    InvalidValue {
        /// Key whose value failed to decode.
        key: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// One write inside an atomic [`KeyValueStore::commit`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Insert or replace a value.
    Put {
        /// Key to write.
        key: String,
        /// Raw value bytes.
        value: Vec<u8>,
    },
    /// Delete a key. Deleting an absent key is not an error.
    Remove {
        /// Key to delete.
        key: String,
    },
}

impl StoreOp {
    /// Build a put of an encoded boolean.
    pub fn put_bool(key: impl Into<String>, value: bool) -> Self {
        Self::Put {
            key: key.into(),
            value: encode_bool(value),
        }
    }

    /// Build a put of UTF-8 text.
    pub fn put_text(key: impl Into<String>, value: &str) -> Self {
        Self::Put {
            key: key.into(),
            value: value.as_bytes().to_vec(),
        }
    }

    /// Build a removal.
    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }
}

/// Namespaced durable key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a raw value. `None` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace a raw value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a key if present.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Apply every operation atomically, in order.
    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    /// Read a boolean written by [`put_bool`](Self::put_bool).
    async fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => decode_bool(&bytes).map(Some).ok_or_else(|| StoreError::InvalidValue {
                key: key.to_owned(),
            }),
        }
    }

    /// Write a boolean.
    async fn put_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.put(key, encode_bool(value)).await
    }

    /// Read UTF-8 text.
    async fn get_text(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StoreError::InvalidValue {
                    key: key.to_owned(),
                }),
        }
    }

    /// Write UTF-8 text.
    async fn put_text(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put(key, value.as_bytes().to_vec()).await
    }
}

fn encode_bool(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

fn decode_bool(bytes: &[u8]) -> Option<bool> {
    match bytes {
        [0] => Some(false),
        [1] => Some(true),
        _ => None,
    }
}
