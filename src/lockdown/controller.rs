//! Lockdown state machine and anti-exit watchdog.
//!
//! The persisted snapshot is the session: a controller is armed from it when
//! opened, and only [`LockdownController::exit`] disarms it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::snapshot::{RestrictionSnapshot, SnapshotStore};
use super::{LockdownError, PolicyCapability, PolicyError, Restriction, SurfaceCapability};
use crate::store::KeyValueStore;

/// Session state, derived from snapshot presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockdownState {
    /// No snapshot persisted.
    Inactive,
    /// A snapshot is persisted; the device should be locked.
    Active,
}

/// Observed lockdown state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockdownStatus {
    /// Session state.
    pub state: LockdownState,
    /// Whether the device reports foreground pinning.
    pub pinned: bool,
    /// Package the device is locked to, when active.
    pub package: Option<String>,
    /// When the active session's snapshot was captured.
    pub since: Option<DateTime<Utc>>,
}

/// Result of a successful [`LockdownController::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A new snapshot was captured and lockdown engaged.
    Engaged,
    /// Lockdown was already active; the first snapshot and its package
    /// were kept and re-applied.
    Reasserted,
}

/// Activation request from the platform (the kiosk surface's intent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Leave lockdown instead of entering it.
    pub stop_theft_mode: bool,
    /// Package to lock to. Falls back to the configured package.
    pub package: Option<String>,
}

/// Lifecycle events of the locked surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The surface lost window focus.
    FocusLost,
    /// The surface was paused. `task_root` is false when the user is
    /// leaving the task.
    Paused {
        /// Whether the surface is still its task's root.
        task_root: bool,
    },
    /// A navigation or hardware key was pressed.
    KeyDown,
    /// The surface started.
    Started,
}

/// What the watchdog did about a [`SurfaceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Lockdown is inactive; the event is not handled.
    Ignored,
    /// Immersive mode was re-applied.
    ReassertedImmersive,
    /// The locked surface was brought back.
    Relaunched,
    /// The key input is consumed.
    Suppressed,
    /// Pinning was re-engaged and the status bar hidden.
    Repinned,
    /// The event needed no correction.
    NoAction,
}

/// Drives the lockdown state machine.
pub struct LockdownController {
    policy: Arc<dyn PolicyCapability>,
    surface: Arc<dyn SurfaceCapability>,
    snapshots: SnapshotStore,
    default_package: String,
    active: AtomicBool,
    lock: Mutex<()>,
}

impl std::fmt::Debug for LockdownController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockdownController")
            .field("default_package", &self.default_package)
            .field("active", &self.active.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl LockdownController {
    /// Open a controller over the lockdown store.
    ///
    /// The watchdog is armed when a snapshot is persisted, so a controller
    /// built after a restart defends the session before anyone calls
    /// [`resume`](Self::resume). Resuming is still needed to re-apply the
    /// device policy.
    ///
    /// # Errors
    ///
    /// [`LockdownError::Storage`] if the snapshot cannot be read.
    pub async fn open(
        policy: Arc<dyn PolicyCapability>,
        surface: Arc<dyn SurfaceCapability>,
        store: Arc<dyn KeyValueStore>,
        default_package: impl Into<String>,
    ) -> Result<Self, LockdownError> {
        let snapshots = SnapshotStore::new(store);
        let persisted = snapshots.load().await?;
        if let Some(snapshot) = &persisted {
            debug!(package = snapshot.package(), "persisted lockdown found, watchdog armed");
        }
        Ok(Self {
            policy,
            surface,
            snapshots,
            default_package: default_package.into(),
            active: AtomicBool::new(persisted.is_some()),
            lock: Mutex::new(()),
        })
    }

    /// Package used when a request names none.
    pub fn default_package(&self) -> &str {
        &self.default_package
    }

    /// Lock the device to `package`.
    ///
    /// The first call snapshots the current restrictions. Calling again
    /// while active keeps that snapshot and re-applies the lockdown for the
    /// persisted package; the requested one is ignored.
    ///
    /// # Errors
    ///
    /// [`LockdownError::PolicyRejected`] if the device refuses any call. A
    /// fresh entry is rolled back and its snapshot discarded.
    /// [`LockdownError::Storage`] if the snapshot cannot be persisted.
    pub async fn enter(&self, package: &str) -> Result<EntryKind, LockdownError> {
        let _guard = self.lock.lock().await;

        let (snapshot, kind) = match self.snapshots.load().await? {
            Some(existing) => {
                if existing.package() != package {
                    warn!(
                        locked = existing.package(),
                        requested = package,
                        "lockdown already active for another package, keeping it"
                    );
                }
                (existing, EntryKind::Reasserted)
            }
            None => {
                let mut values = BTreeMap::new();
                for restriction in Restriction::ALL {
                    values.insert(restriction, self.policy.get_restriction(restriction)?);
                }
                let snapshot = RestrictionSnapshot::capture(values, package);
                self.snapshots.save(&snapshot).await?;
                (snapshot, EntryKind::Engaged)
            }
        };

        let was_pinned = self.policy.is_pinned();
        if let Err(e) = self.apply_lockdown(snapshot.package()) {
            warn!(error = %e, "lockdown entry rejected");
            if kind == EntryKind::Engaged {
                self.roll_back_entry(&snapshot, was_pinned);
                if let Err(store_err) = self.snapshots.clear().await {
                    error!(error = %store_err, "failed to discard snapshot after rollback");
                }
            }
            return Err(e.into());
        }

        self.active.store(true, Ordering::Release);
        info!(package = snapshot.package(), kind = ?kind, "lockdown engaged");
        Ok(kind)
    }

    /// Leave lockdown and restore the snapshot.
    ///
    /// Returns the restored snapshot.
    ///
    /// # Errors
    ///
    /// [`LockdownError::SnapshotMissing`] when nothing is persisted; the
    /// surface is still released. [`LockdownError::PolicyRejected`] if the
    /// restore is refused; the device is locked again and the snapshot kept
    /// so the exit can be retried. [`LockdownError::Storage`] if the
    /// snapshot cannot be cleared after the device was released; the
    /// watchdog is disarmed anyway and a retry finishes the exit.
    pub async fn exit(&self) -> Result<RestrictionSnapshot, LockdownError> {
        let _guard = self.lock.lock().await;

        let Some(snapshot) = self.snapshots.load().await? else {
            warn!("exit requested without a snapshot, releasing surface");
            self.release_surface()?;
            self.active.store(false, Ordering::Release);
            return Err(LockdownError::SnapshotMissing);
        };

        if let Err(e) = self.restore(&snapshot) {
            warn!(error = %e, "lockdown exit rejected, re-locking");
            self.roll_back_exit(snapshot.package());
            return Err(e.into());
        }

        self.active.store(false, Ordering::Release);
        if let Err(e) = self.snapshots.clear().await {
            error!(error = %e, "device released but snapshot could not be cleared");
            return Err(e.into());
        }
        info!(package = snapshot.package(), "lockdown released");
        Ok(snapshot)
    }

    /// Current state as seen by the store and the device.
    ///
    /// # Errors
    ///
    /// [`LockdownError::Storage`] if the snapshot cannot be read.
    pub async fn status(&self) -> Result<LockdownStatus, LockdownError> {
        let _guard = self.lock.lock().await;
        let snapshot = self.snapshots.load().await?;
        self.active.store(snapshot.is_some(), Ordering::Release);
        Ok(LockdownStatus {
            state: if snapshot.is_some() {
                LockdownState::Active
            } else {
                LockdownState::Inactive
            },
            pinned: self.policy.is_pinned(),
            since: snapshot.as_ref().and_then(RestrictionSnapshot::captured_at),
            package: snapshot.map(|s| s.package().to_owned()),
        })
    }

    /// Re-apply a persisted lockdown after a restart.
    ///
    /// # Errors
    ///
    /// [`LockdownError::PolicyRejected`] if the device refuses,
    /// [`LockdownError::Storage`] if the snapshot cannot be read.
    pub async fn resume(&self) -> Result<LockdownState, LockdownError> {
        let _guard = self.lock.lock().await;
        let Some(snapshot) = self.snapshots.load().await? else {
            self.active.store(false, Ordering::Release);
            return Ok(LockdownState::Inactive);
        };

        self.active.store(true, Ordering::Release);
        if !self.policy.is_pinned() {
            info!(package = snapshot.package(), "re-engaging lockdown after restart");
            self.apply_lockdown(snapshot.package())?;
            self.surface.relaunch();
        }
        Ok(LockdownState::Active)
    }

    /// Handle an activation request: enter, or exit when the stop flag is set.
    ///
    /// # Errors
    ///
    /// Whatever [`enter`](Self::enter) or [`exit`](Self::exit) report.
    pub async fn handle_activation(
        &self,
        request: ActivationRequest,
    ) -> Result<LockdownState, LockdownError> {
        if request.stop_theft_mode {
            self.exit().await?;
            return Ok(LockdownState::Inactive);
        }
        let package = request.package.as_deref().unwrap_or(&self.default_package);
        self.enter(package).await?;
        Ok(LockdownState::Active)
    }

    /// Anti-exit watchdog. Runs the correction before returning.
    pub fn on_surface_event(&self, event: SurfaceEvent) -> WatchdogAction {
        if !self.active.load(Ordering::Acquire) {
            return WatchdogAction::Ignored;
        }
        match event {
            SurfaceEvent::FocusLost => {
                self.surface.reassert_immersive();
                WatchdogAction::ReassertedImmersive
            }
            SurfaceEvent::Paused { task_root: false } => {
                debug!("surface left its task, relaunching");
                self.surface.relaunch();
                WatchdogAction::Relaunched
            }
            SurfaceEvent::Paused { task_root: true } => WatchdogAction::NoAction,
            SurfaceEvent::KeyDown => WatchdogAction::Suppressed,
            SurfaceEvent::Started => {
                if !self.policy.is_pinned() {
                    if let Err(e) = self.policy.pin_foreground() {
                        warn!(error = %e, "failed to re-engage pinning");
                    }
                }
                if let Err(e) = self.policy.set_status_bar_enabled(false) {
                    warn!(error = %e, "failed to hide status bar");
                }
                WatchdogAction::Repinned
            }
        }
    }

    fn apply_lockdown(&self, package: &str) -> Result<(), PolicyError> {
        for restriction in Restriction::ALL {
            self.policy.set_restriction(restriction, true)?;
        }
        self.policy.set_foreground_allow_list(&[package.to_owned()])?;
        if !self.policy.is_pinned() {
            self.policy.pin_foreground()?;
        }
        self.policy.set_status_bar_enabled(false)
    }

    fn restore(&self, snapshot: &RestrictionSnapshot) -> Result<(), PolicyError> {
        self.policy.unpin()?;
        for restriction in Restriction::ALL {
            self.policy.set_restriction(restriction, snapshot.value(restriction))?;
        }
        self.policy.set_foreground_allow_list(&[])?;
        self.policy.set_status_bar_enabled(true)
    }

    fn release_surface(&self) -> Result<(), PolicyError> {
        self.policy.unpin()?;
        self.policy.set_foreground_allow_list(&[])?;
        self.policy.set_status_bar_enabled(true)
    }

    // Rollbacks attempt every step even if an earlier one fails.
    fn roll_back_exit(&self, package: &str) {
        for restriction in Restriction::ALL {
            if let Err(e) = self.policy.set_restriction(restriction, true) {
                error!(error = %e, %restriction, "re-lock failed");
            }
        }
        if let Err(e) = self.policy.set_foreground_allow_list(&[package.to_owned()]) {
            error!(error = %e, "re-lock of allow-list failed");
        }
        if !self.policy.is_pinned() {
            if let Err(e) = self.policy.pin_foreground() {
                error!(error = %e, "re-lock of pinning failed");
            }
        }
        if let Err(e) = self.policy.set_status_bar_enabled(false) {
            error!(error = %e, "re-lock of status bar failed");
        }
    }

    fn roll_back_entry(&self, snapshot: &RestrictionSnapshot, was_pinned: bool) {
        for restriction in Restriction::ALL {
            if let Err(e) = self
                .policy
                .set_restriction(restriction, snapshot.value(restriction))
            {
                error!(error = %e, %restriction, "rollback failed");
            }
        }
        if let Err(e) = self.policy.set_foreground_allow_list(&[]) {
            error!(error = %e, "rollback of allow-list failed");
        }
        if !was_pinned && self.policy.is_pinned() {
            if let Err(e) = self.policy.unpin() {
                error!(error = %e, "rollback of pinning failed");
            }
        }
        if let Err(e) = self.policy.set_status_bar_enabled(true) {
            error!(error = %e, "rollback of status bar failed");
        }
    }
}
