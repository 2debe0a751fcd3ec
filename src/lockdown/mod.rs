//! Kiosk ("theft mode") lockdown.
//!
//! Entering lockdown captures the current device restrictions into a
//! persisted [`RestrictionSnapshot`], disallows every restriction in
//! [`Restriction::ALL`], pins the foreground to one package and hides the
//! status bar. Exiting restores the snapshot exactly, even after a process
//! restart, because the snapshot is the source of truth for the session
//! state rather than anything re-derived from the device.

mod controller;
pub mod device;
pub mod remote;
pub mod snapshot;

pub use controller::{
    ActivationRequest, EntryKind, LockdownController, LockdownState, LockdownStatus,
    SurfaceEvent, WatchdogAction,
};
pub use device::SimulatedDevice;
pub use remote::{LockdownExecutor, START_THEFT_MODE, STOP_THEFT_MODE};
pub use snapshot::{RestrictionSnapshot, SnapshotStore};

use crate::store::StoreError;

/// Device-wide restrictions managed by lockdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Restriction {
    /// Booting into safe mode.
    SafeBoot,
    /// Factory reset from settings.
    FactoryReset,
    /// Adding users.
    AddUser,
    /// Mounting physical external media.
    MountPhysicalMedia,
    /// Adjusting the volume.
    AdjustVolume,
}

impl Restriction {
    /// Every restriction lockdown touches, in application order.
    pub const ALL: [Restriction; 5] = [
        Restriction::SafeBoot,
        Restriction::FactoryReset,
        Restriction::AddUser,
        Restriction::MountPhysicalMedia,
        Restriction::AdjustVolume,
    ];

    /// Platform restriction key. Also the persisted snapshot key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafeBoot => "no_safe_boot",
            Self::FactoryReset => "no_factory_reset",
            Self::AddUser => "no_add_user",
            Self::MountPhysicalMedia => "no_physical_media",
            Self::AdjustVolume => "no_adjust_volume",
        }
    }
}

impl std::fmt::Display for Restriction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy call the device refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} rejected: {reason}")]
pub struct PolicyError {
    /// Policy operation that failed.
    pub operation: String,
    /// Reason reported by the device.
    pub reason: String,
}

impl PolicyError {
    /// Build an error for `operation`.
    pub fn new(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Device policy service.
///
/// `true` for a restriction means "disallowed".
pub trait PolicyCapability: Send + Sync {
    /// Current value of `restriction`.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the device refuses the query.
    fn get_restriction(&self, restriction: Restriction) -> Result<bool, PolicyError>;

    /// Set `restriction`.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the device refuses, e.g. for lack of privilege.
    fn set_restriction(&self, restriction: Restriction, disallowed: bool)
        -> Result<(), PolicyError>;

    /// Replace the set of packages allowed to pin the foreground.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the device refuses.
    fn set_foreground_allow_list(&self, packages: &[String]) -> Result<(), PolicyError>;

    /// Whether foreground pinning is engaged.
    fn is_pinned(&self) -> bool;

    /// Engage foreground pinning.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the device refuses.
    fn pin_foreground(&self) -> Result<(), PolicyError>;

    /// Release foreground pinning.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the device refuses.
    fn unpin(&self) -> Result<(), PolicyError>;

    /// Show or hide the status bar.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the device refuses.
    fn set_status_bar_enabled(&self, enabled: bool) -> Result<(), PolicyError>;
}

/// The locked foreground surface.
pub trait SurfaceCapability: Send + Sync {
    /// Hide system navigation again after focus loss.
    fn reassert_immersive(&self);

    /// Bring the locked surface back to the foreground.
    fn relaunch(&self);
}

/// Lockdown failures.
#[derive(Debug, thiserror::Error)]
pub enum LockdownError {
    /// The device refused a policy call. The transition did not happen.
    #[error("policy rejected: {0}")]
    PolicyRejected(#[from] PolicyError),
    /// Exit was requested but no snapshot is persisted.
    #[error("no restriction snapshot to restore")]
    SnapshotMissing,
    /// The lockdown store failed.
    #[error("lockdown store failed: {0}")]
    Storage(#[from] StoreError),
}

impl LockdownError {
    /// Generic text for interactive surfaces.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PolicyRejected(_) => "Device policy refused the change",
            Self::SnapshotMissing => "Theft mode is not active",
            Self::Storage(_) => "Failed to update theft mode",
        }
    }
}
