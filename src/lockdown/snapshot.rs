//! Persisted restriction snapshot.
//!
//! One bool per restriction key, plus a marker, the locked package and the
//! capture time. The whole record is written and cleared in one atomic
//! batch; the marker alone decides whether a snapshot exists.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::Restriction;
use crate::store::{KeyValueStore, StoreError, StoreOp};

const MARKER_KEY: &str = "snapshot.active";
const PACKAGE_KEY: &str = "snapshot.package";
const CAPTURED_AT_KEY: &str = "snapshot.captured_at";

/// Restriction values captured at lockdown entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionSnapshot {
    values: BTreeMap<Restriction, bool>,
    package: String,
    captured_at: Option<DateTime<Utc>>,
}

impl RestrictionSnapshot {
    /// Snapshot taken now.
    pub fn capture(values: BTreeMap<Restriction, bool>, package: impl Into<String>) -> Self {
        Self {
            values,
            package: package.into(),
            captured_at: Some(Utc::now()),
        }
    }

    /// Captured value for `restriction`. Missing entries read as `false`.
    pub fn value(&self, restriction: Restriction) -> bool {
        self.values.get(&restriction).copied().unwrap_or(false)
    }

    /// Package the device was locked to.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// When the snapshot was taken, if recorded.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.captured_at
    }
}

/// Lockdown namespace of the key-value store.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Wrap the lockdown store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the persisted snapshot, if any.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the store fails or a value has the wrong encoding.
    pub async fn load(&self) -> Result<Option<RestrictionSnapshot>, StoreError> {
        if self.store.get_bool(MARKER_KEY).await? != Some(true) {
            return Ok(None);
        }

        let mut values = BTreeMap::new();
        for restriction in Restriction::ALL {
            if let Some(value) = self.store.get_bool(restriction.as_str()).await? {
                values.insert(restriction, value);
            }
        }
        let package = self.store.get_text(PACKAGE_KEY).await?.unwrap_or_default();
        let captured_at = self
            .store
            .get_text(CAPTURED_AT_KEY)
            .await?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Some(RestrictionSnapshot {
            values,
            package,
            captured_at,
        }))
    }

    /// Persist `snapshot` atomically.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the batch fails. Nothing is written in that case.
    pub async fn save(&self, snapshot: &RestrictionSnapshot) -> Result<(), StoreError> {
        let mut ops: Vec<StoreOp> = Restriction::ALL
            .iter()
            .map(|r| StoreOp::put_bool(r.as_str(), snapshot.value(*r)))
            .collect();
        ops.push(StoreOp::put_text(PACKAGE_KEY, &snapshot.package));
        match snapshot.captured_at {
            Some(at) => ops.push(StoreOp::put_text(CAPTURED_AT_KEY, &at.to_rfc3339())),
            None => ops.push(StoreOp::remove(CAPTURED_AT_KEY)),
        }
        ops.push(StoreOp::put_bool(MARKER_KEY, true));
        self.store.commit(ops).await
    }

    /// Remove the snapshot atomically.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the batch fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut ops: Vec<StoreOp> = Restriction::ALL
            .iter()
            .map(|r| StoreOp::remove(r.as_str()))
            .collect();
        ops.push(StoreOp::remove(PACKAGE_KEY));
        ops.push(StoreOp::remove(CAPTURED_AT_KEY));
        ops.push(StoreOp::remove(MARKER_KEY));
        self.store.commit(ops).await
    }
}
