//! SQLite key-value store behavior.

use warden::store::{open_database, KeyValueStore, SqliteStore, StoreError, StoreOp};

async fn open(dir: &tempfile::TempDir, namespace: &str) -> SqliteStore {
    let pool = open_database(&dir.path().join("nested/warden.db"))
        .await
        .expect("open database");
    SqliteStore::new(pool, namespace)
}

#[tokio::test]
async fn put_get_remove() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(&dir, "credential").await;

    assert_eq!(store.get("k").await.expect("get"), None);
    store.put("k", b"v1".to_vec()).await.expect("put");
    store.put("k", b"v2".to_vec()).await.expect("overwrite");
    assert_eq!(store.get("k").await.expect("get"), Some(b"v2".to_vec()));

    store.remove("k").await.expect("remove");
    store.remove("k").await.expect("remove absent");
    assert_eq!(store.get("k").await.expect("get"), None);
}

#[tokio::test]
async fn namespaces_are_independent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let credential = open(&dir, "credential").await;
    let lockdown = open(&dir, "lockdown").await;

    credential.put_text("shared", "blob").await.expect("put");
    lockdown.put_bool("shared", true).await.expect("put");

    assert_eq!(
        credential.get_text("shared").await.expect("get").as_deref(),
        Some("blob")
    );
    assert_eq!(lockdown.get_bool("shared").await.expect("get"), Some(true));
    assert_eq!(lockdown.namespace(), "lockdown");
}

#[tokio::test]
async fn commit_applies_batch_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(&dir, "lockdown").await;
    store.put_bool("stale", true).await.expect("put");

    store
        .commit(vec![
            StoreOp::put_bool("a", true),
            StoreOp::put_text("b", "text"),
            StoreOp::remove("stale"),
            StoreOp::put_bool("a", false),
        ])
        .await
        .expect("commit");

    assert_eq!(store.get_bool("a").await.expect("get"), Some(false));
    assert_eq!(store.get_text("b").await.expect("get").as_deref(), Some("text"));
    assert_eq!(store.get("stale").await.expect("get"), None);
}

#[tokio::test]
async fn values_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = open(&dir, "lockdown").await;
        store.put_bool("no_safe_boot", false).await.expect("put");
    }
    let store = open(&dir, "lockdown").await;
    assert_eq!(store.get_bool("no_safe_boot").await.expect("get"), Some(false));
}

#[tokio::test]
async fn wrong_encoding_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(&dir, "lockdown").await;
    store.put("flag", vec![7]).await.expect("put");
    store.put("text", vec![0xff, 0xfe]).await.expect("put");

    assert!(matches!(
        store.get_bool("flag").await,
        Err(StoreError::InvalidValue { key }) if key == "flag"
    ));
    assert!(matches!(
        store.get_text("text").await,
        Err(StoreError::InvalidValue { .. })
    ));
}
