//! Lockdown entry, exit and restart behavior.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use warden::lockdown::device::DeviceState;
use warden::lockdown::{
    ActivationRequest, EntryKind, LockdownController, LockdownError, LockdownState,
    PolicyCapability, Restriction, SimulatedDevice, SurfaceEvent, WatchdogAction,
};
use warden::store::{open_database, KeyValueStore, MemoryStore, SqliteStore, StoreError, StoreOp};

const KIOSK: &str = "dev.warden.kiosk";

fn device_with(values: &[(Restriction, bool)]) -> Arc<SimulatedDevice> {
    let restrictions: BTreeMap<String, bool> = values
        .iter()
        .map(|(r, v)| (r.as_str().to_owned(), *v))
        .collect();
    Arc::new(SimulatedDevice::with_state(DeviceState {
        restrictions,
        status_bar_enabled: true,
        ..DeviceState::default()
    }))
}

async fn controller(
    device: &Arc<SimulatedDevice>,
    store: Arc<dyn KeyValueStore>,
) -> LockdownController {
    LockdownController::open(device.clone(), device.clone(), store, KIOSK)
        .await
        .expect("open controller")
}

/// Memory store whose batches can be made to fail.
#[derive(Default)]
struct FailingCommits {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FailingCommits {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.put(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_owned()));
        }
        self.inner.commit(ops).await
    }
}

fn restriction_values(device: &SimulatedDevice) -> Vec<bool> {
    Restriction::ALL
        .iter()
        .map(|r| device.get_restriction(*r).expect("get"))
        .collect()
}

fn restriction_values_unchecked(device: &SimulatedDevice) -> Vec<bool> {
    let state = device.state();
    Restriction::ALL
        .iter()
        .map(|r| state.restrictions.get(r.as_str()).copied().unwrap_or(false))
        .collect()
}

#[tokio::test]
async fn enter_locks_everything_down() {
    let device = device_with(&[]);
    let controller = controller(&device, Arc::new(MemoryStore::new())).await;

    assert_eq!(controller.enter(KIOSK).await.expect("enter"), EntryKind::Engaged);

    let state = device.state();
    assert_eq!(restriction_values(&device), vec![true; 5]);
    assert_eq!(state.allow_list, vec![KIOSK.to_owned()]);
    assert!(state.pinned);
    assert!(!state.status_bar_enabled);

    let status = controller.status().await.expect("status");
    assert_eq!(status.state, LockdownState::Active);
    assert!(status.pinned);
    assert_eq!(status.package.as_deref(), Some(KIOSK));
    assert!(status.since.is_some());

    controller.exit().await.expect("exit");
    let status = controller.status().await.expect("status");
    assert_eq!(status.package, None);
    assert_eq!(status.since, None);
}

#[tokio::test]
async fn exit_restores_exactly_across_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("warden.db");
    let device = device_with(&[
        (Restriction::SafeBoot, false),
        (Restriction::FactoryReset, false),
        (Restriction::AddUser, true),
    ]);

    {
        let pool = open_database(&db_path).await.expect("open db");
        let controller =
            controller(&device, Arc::new(SqliteStore::new(pool.clone(), "lockdown"))).await;
        controller.enter(KIOSK).await.expect("enter");
        assert!(device.get_restriction(Restriction::SafeBoot).expect("get"));
        assert!(device.get_restriction(Restriction::FactoryReset).expect("get"));
        pool.close().await;
    }

    let pool = open_database(&db_path).await.expect("reopen db");
    let restarted = controller(&device, Arc::new(SqliteStore::new(pool, "lockdown"))).await;
    assert_eq!(
        restarted.status().await.expect("status").state,
        LockdownState::Active
    );

    let snapshot = restarted.exit().await.expect("exit");
    assert!(!snapshot.value(Restriction::SafeBoot));
    assert!(!device.get_restriction(Restriction::SafeBoot).expect("get"));
    assert!(!device.get_restriction(Restriction::FactoryReset).expect("get"));
    assert!(device.get_restriction(Restriction::AddUser).expect("get"));

    let state = device.state();
    assert!(!state.pinned);
    assert!(state.allow_list.is_empty());
    assert!(state.status_bar_enabled);
    assert_eq!(
        restarted.status().await.expect("status").state,
        LockdownState::Inactive
    );
}

#[tokio::test]
async fn second_enter_keeps_the_first_snapshot() {
    let device = device_with(&[(Restriction::AdjustVolume, true)]);
    let store = MemoryStore::new();
    let controller = controller(&device, Arc::new(store.clone())).await;

    assert_eq!(controller.enter(KIOSK).await.expect("enter"), EntryKind::Engaged);
    // Everything is now disallowed; a re-snapshot would capture all true.
    assert_eq!(
        controller.enter(KIOSK).await.expect("enter again"),
        EntryKind::Reasserted
    );
    assert_eq!(
        controller.status().await.expect("status").state,
        LockdownState::Active
    );

    controller.exit().await.expect("exit");
    assert_eq!(
        restriction_values(&device),
        vec![false, false, false, false, true]
    );
    assert!(store.keys().await.is_empty());
}

#[tokio::test]
async fn reentry_for_another_package_stays_on_the_locked_one() {
    let device = device_with(&[]);
    let store = MemoryStore::new();
    let first = controller(&device, Arc::new(store.clone())).await;

    first.enter("com.a").await.expect("enter");
    assert_eq!(
        first.enter("com.b").await.expect("enter again"),
        EntryKind::Reasserted
    );
    let status = first.status().await.expect("status");
    assert_eq!(status.package.as_deref(), Some("com.a"));
    assert_eq!(device.state().allow_list, vec!["com.a".to_owned()]);

    // Reboot: pinning is lost, the persisted package is re-pinned.
    device.unpin().expect("unpin");
    let restarted = controller(&device, Arc::new(store)).await;
    restarted.resume().await.expect("resume");
    let status = restarted.status().await.expect("status");
    assert_eq!(status.package.as_deref(), Some("com.a"));
    assert!(status.pinned);
    assert_eq!(device.state().allow_list, vec!["com.a".to_owned()]);
}

#[tokio::test]
async fn failed_snapshot_clear_still_disarms_the_watchdog() {
    let device = device_with(&[(Restriction::AddUser, true)]);
    let store = Arc::new(FailingCommits::default());
    let controller = controller(&device, store.clone()).await;
    controller.enter(KIOSK).await.expect("enter");

    store.failing.store(true, Ordering::SeqCst);
    assert!(matches!(
        controller.exit().await,
        Err(LockdownError::Storage(_))
    ));
    assert!(!device.is_pinned());
    assert_eq!(
        restriction_values(&device),
        vec![false, false, true, false, false]
    );
    assert_eq!(
        controller.on_surface_event(SurfaceEvent::Paused { task_root: false }),
        WatchdogAction::Ignored
    );
    assert_eq!(device.state().relaunches, 0);

    store.failing.store(false, Ordering::SeqCst);
    controller.exit().await.expect("retry exit");
    assert_eq!(
        controller.status().await.expect("status").state,
        LockdownState::Inactive
    );
    assert_eq!(
        restriction_values(&device),
        vec![false, false, true, false, false]
    );
}

#[tokio::test]
async fn exit_without_snapshot_releases_surface() {
    let device = device_with(&[]);
    device
        .set_foreground_allow_list(&[KIOSK.to_owned()])
        .expect("allow");
    device.pin_foreground().expect("pin");
    device.set_status_bar_enabled(false).expect("hide");

    let controller = controller(&device, Arc::new(MemoryStore::new())).await;
    assert!(matches!(
        controller.exit().await,
        Err(LockdownError::SnapshotMissing)
    ));
    let state = device.state();
    assert!(!state.pinned);
    assert!(state.allow_list.is_empty());
    assert!(state.status_bar_enabled);
}

#[tokio::test]
async fn rejected_entry_rolls_back() {
    let device = device_with(&[(Restriction::SafeBoot, false)]);
    device.reject("set_restriction:no_add_user");
    let store = MemoryStore::new();
    let controller = controller(&device, Arc::new(store.clone())).await;

    assert!(matches!(
        controller.enter(KIOSK).await,
        Err(LockdownError::PolicyRejected(_))
    ));
    assert_eq!(restriction_values(&device), vec![false; 5]);
    let state = device.state();
    assert!(!state.pinned);
    assert!(state.status_bar_enabled);
    assert!(store.keys().await.is_empty());
    assert_eq!(
        controller.status().await.expect("status").state,
        LockdownState::Inactive
    );

    device.allow("set_restriction:no_add_user");
    assert_eq!(controller.enter(KIOSK).await.expect("retry"), EntryKind::Engaged);
}

#[tokio::test]
async fn rejected_exit_relocks_and_keeps_snapshot() {
    let device = device_with(&[]);
    let controller = controller(&device, Arc::new(MemoryStore::new())).await;
    controller.enter(KIOSK).await.expect("enter");

    device.reject("set_restriction:no_factory_reset");
    assert!(matches!(
        controller.exit().await,
        Err(LockdownError::PolicyRejected(_))
    ));
    assert!(device.is_pinned());
    assert!(device.get_restriction(Restriction::SafeBoot).expect("get"));
    assert_eq!(
        controller.status().await.expect("status").state,
        LockdownState::Active
    );

    device.allow("set_restriction:no_factory_reset");
    controller.exit().await.expect("retry exit");
    assert_eq!(restriction_values(&device), vec![false; 5]);
}

#[tokio::test]
async fn rejected_snapshot_read_changes_nothing() {
    let device = device_with(&[]);
    let store = MemoryStore::new();
    let controller = controller(&device, Arc::new(store.clone())).await;
    device.reject("get_restriction");

    assert!(matches!(
        controller.enter(KIOSK).await,
        Err(LockdownError::PolicyRejected(_))
    ));
    assert!(store.keys().await.is_empty());
    assert_eq!(restriction_values_unchecked(&device), vec![false; 5]);
    assert!(!device.is_pinned());
}

#[tokio::test]
async fn activation_requests_map_to_enter_and_exit() {
    let device = device_with(&[]);
    let controller = controller(&device, Arc::new(MemoryStore::new())).await;

    let state = controller
        .handle_activation(ActivationRequest::default())
        .await
        .expect("activate");
    assert_eq!(state, LockdownState::Active);
    assert_eq!(device.state().allow_list, vec![KIOSK.to_owned()]);

    let state = controller
        .handle_activation(ActivationRequest {
            stop_theft_mode: true,
            package: None,
        })
        .await
        .expect("stop");
    assert_eq!(state, LockdownState::Inactive);
    assert!(!device.is_pinned());
}

#[tokio::test]
async fn resume_repins_after_reboot() {
    let device = device_with(&[]);
    let store = MemoryStore::new();
    controller(&device, Arc::new(store.clone()))
        .await
        .enter("com.example.locked")
        .await
        .expect("enter");

    // A reboot drops pinning but keeps restrictions.
    device.unpin().expect("unpin");
    let restarted = controller(&device, Arc::new(store)).await;
    assert_eq!(restarted.resume().await.expect("resume"), LockdownState::Active);
    let state = device.state();
    assert!(state.pinned);
    assert_eq!(state.allow_list, vec!["com.example.locked".to_owned()]);
    assert_eq!(state.relaunches, 1);
}

#[tokio::test]
async fn resume_without_snapshot_is_inactive() {
    let device = device_with(&[]);
    let controller = controller(&device, Arc::new(MemoryStore::new())).await;
    assert_eq!(
        controller.resume().await.expect("resume"),
        LockdownState::Inactive
    );
    assert!(!device.is_pinned());
}
