//! In-memory store used by tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyValueStore, StoreError, StoreOp};

/// In-memory key-value store.
///
/// Clones share the same entries, so a clone handed to a freshly built
/// component behaves like the same durable store after a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted list of present keys.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        for op in ops {
            match op {
                StoreOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                StoreOp::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
