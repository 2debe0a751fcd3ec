//! Simulated device policy service and kiosk surface.
//!
//! Backs [`PolicyCapability`] and [`SurfaceCapability`] with a JSON state
//! file so the binary can run on a host, and with plain memory for tests.
//! Operations named in `rejected_operations` fail, which is how privilege
//! errors are reproduced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PolicyCapability, PolicyError, Restriction, SurfaceCapability};

/// Everything the simulated device remembers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    /// Restriction key to disallowed flag.
    pub restrictions: BTreeMap<String, bool>,
    /// Packages allowed to pin the foreground.
    pub allow_list: Vec<String>,
    /// Whether foreground pinning is engaged.
    pub pinned: bool,
    /// Whether the status bar is shown.
    pub status_bar_enabled: bool,
    /// Number of immersive re-assertions.
    pub immersive_reasserts: u32,
    /// Number of surface relaunches.
    pub relaunches: u32,
    /// Operations that fail, as `operation` or `set_restriction:<key>`.
    pub rejected_operations: BTreeSet<String>,
}

impl DeviceState {
    fn fresh() -> Self {
        Self {
            status_bar_enabled: true,
            ..Self::default()
        }
    }
}

/// Simulated policy service and surface.
#[derive(Debug)]
pub struct SimulatedDevice {
    path: Option<PathBuf>,
    state: Mutex<DeviceState>,
}

impl SimulatedDevice {
    /// Device held only in memory.
    pub fn in_memory() -> Self {
        Self::with_state(DeviceState::fresh())
    }

    /// Device held in memory starting from `state`.
    pub fn with_state(state: DeviceState) -> Self {
        Self {
            path: None,
            state: Mutex::new(state),
        }
    }

    /// Load the device from `path`, starting fresh if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let state = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("invalid device state in {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DeviceState::fresh(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read device state {}", path.display()))
            }
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// Copy of the current state.
    pub fn state(&self) -> DeviceState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Make `operation` fail from now on.
    pub fn reject(&self, operation: impl Into<String>) {
        let operation = operation.into();
        let _ = self.update("reject", |state| {
            state.rejected_operations.insert(operation);
            Ok(())
        });
    }

    /// Stop failing `operation`.
    pub fn allow(&self, operation: &str) {
        let _ = self.update("allow", |state| {
            state.rejected_operations.remove(operation);
            Ok(())
        });
    }

    fn lock(&self, operation: &str) -> Result<MutexGuard<'_, DeviceState>, PolicyError> {
        self.state
            .lock()
            .map_err(|e| PolicyError::new(operation, format!("lock poisoned: {e}")))
    }

    fn update<T>(
        &self,
        operation: &str,
        apply: impl FnOnce(&mut DeviceState) -> Result<T, PolicyError>,
    ) -> Result<T, PolicyError> {
        let mut state = self.lock(operation)?;
        let base = operation.split(':').next().unwrap_or(operation);
        let rejected = &state.rejected_operations;
        if rejected.contains(operation) || rejected.contains(base) {
            debug!(operation, "simulated device rejecting call");
            return Err(PolicyError::new(operation, "not permitted"));
        }
        let mut next = state.clone();
        let value = apply(&mut next)?;
        if next != *state {
            self.persist(operation, &next)?;
            *state = next;
        }
        Ok(value)
    }

    fn persist(&self, operation: &str, state: &DeviceState) -> Result<(), PolicyError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_state(path, state).map_err(|e| {
            warn!(error = %e, path = %path.display(), "failed to persist device state");
            PolicyError::new(operation, format!("{e:#}"))
        })
    }
}

fn write_state(path: &Path, state: &DeviceState) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(state).context("failed to encode device state")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename device state to {}", path.display()))?;
    Ok(())
}

impl PolicyCapability for SimulatedDevice {
    fn get_restriction(&self, restriction: Restriction) -> Result<bool, PolicyError> {
        let state = self.lock("get_restriction")?;
        if state.rejected_operations.contains("get_restriction") {
            return Err(PolicyError::new("get_restriction", "not permitted"));
        }
        Ok(state
            .restrictions
            .get(restriction.as_str())
            .copied()
            .unwrap_or(false))
    }

    fn set_restriction(
        &self,
        restriction: Restriction,
        disallowed: bool,
    ) -> Result<(), PolicyError> {
        self.update(&format!("set_restriction:{restriction}"), |state| {
            state
                .restrictions
                .insert(restriction.as_str().to_owned(), disallowed);
            Ok(())
        })
    }

    fn set_foreground_allow_list(&self, packages: &[String]) -> Result<(), PolicyError> {
        self.update("set_foreground_allow_list", |state| {
            state.allow_list = packages.to_vec();
            Ok(())
        })
    }

    fn is_pinned(&self) -> bool {
        self.state().pinned
    }

    fn pin_foreground(&self) -> Result<(), PolicyError> {
        self.update("pin_foreground", |state| {
            if state.allow_list.is_empty() {
                return Err(PolicyError::new("pin_foreground", "no package is allowed to pin"));
            }
            state.pinned = true;
            Ok(())
        })
    }

    fn unpin(&self) -> Result<(), PolicyError> {
        self.update("unpin", |state| {
            state.pinned = false;
            Ok(())
        })
    }

    fn set_status_bar_enabled(&self, enabled: bool) -> Result<(), PolicyError> {
        self.update("set_status_bar_enabled", |state| {
            state.status_bar_enabled = enabled;
            Ok(())
        })
    }
}

impl SurfaceCapability for SimulatedDevice {
    fn reassert_immersive(&self) {
        let _ = self.update("reassert_immersive", |state| {
            state.immersive_reasserts = state.immersive_reasserts.saturating_add(1);
            Ok(())
        });
    }

    fn relaunch(&self) {
        let _ = self.update("relaunch", |state| {
            state.relaunches = state.relaunches.saturating_add(1);
            Ok(())
        });
    }
}
