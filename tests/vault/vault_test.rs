//! Credential vault behavior.

use std::sync::Arc;

use warden::keystore::{SoftwareKeystore, NONCE_LEN, TAG_LEN};
use warden::store::{KeyValueStore, MemoryStore};
use warden::vault::{CredentialVault, EncryptedBlob, VaultError, CREDENTIAL_KEY};

fn vault_over(store: &MemoryStore) -> CredentialVault {
    CredentialVault::new(
        Arc::new(SoftwareKeystore::in_memory()),
        Arc::new(store.clone()),
        "vault-test",
    )
}

async fn stored_bytes(store: &MemoryStore) -> Vec<u8> {
    let text = store
        .get_text(CREDENTIAL_KEY)
        .await
        .expect("read store")
        .expect("credential present");
    EncryptedBlob::decode(&text).expect("decode").to_bytes()
}

#[tokio::test]
async fn encrypt_then_decrypt_returns_plaintext() {
    let vault = vault_over(&MemoryStore::new());
    let long = "x".repeat(4096);
    for plaintext in ["a", "abc123", "pässwörd with spaces", long.as_str()] {
        let blob = vault.encrypt(plaintext).expect("encrypt");
        assert_eq!(blob.ciphertext().len(), plaintext.len() + TAG_LEN);
        let decrypted = vault.decrypt(&blob).expect("decrypt");
        assert_eq!(decrypted.expose(), plaintext);
    }
}

#[tokio::test]
async fn identical_plaintexts_encrypt_differently() {
    let vault = vault_over(&MemoryStore::new());
    let first = vault.encrypt("abc123").expect("encrypt");
    let second = vault.encrypt("abc123").expect("encrypt");
    assert_ne!(first.nonce(), second.nonce());
    assert_ne!(first.to_bytes(), second.to_bytes());
}

#[tokio::test]
async fn flipping_any_tag_bit_is_detected() {
    let vault = vault_over(&MemoryStore::new());
    let blob = vault.encrypt("abc123").expect("encrypt");
    let bytes = blob.to_bytes();
    let tag_start = bytes.len() - TAG_LEN;

    for index in tag_start..bytes.len() {
        for bit in 0..8 {
            let mut tampered = bytes.clone();
            tampered[index] ^= 1 << bit;
            let tampered = EncryptedBlob::from_bytes(&tampered).expect("layout");
            assert!(
                matches!(vault.decrypt(&tampered), Err(VaultError::AuthFailure)),
                "bit {bit} of byte {index} went undetected"
            );
        }
    }
}

#[tokio::test]
async fn tampered_stored_blob_fails_verification() {
    let store = MemoryStore::new();
    let vault = vault_over(&store);
    vault.set_credential("abc123", "abc123").await.expect("set");

    let mut bytes = stored_bytes(&store).await;
    bytes[NONCE_LEN] ^= 0x01;
    let tampered = EncryptedBlob::from_bytes(&bytes).expect("layout").encode();
    store
        .put_text(CREDENTIAL_KEY, &tampered)
        .await
        .expect("write");

    assert!(matches!(
        vault.verify_credential("abc123").await,
        Err(VaultError::AuthFailure)
    ));
}

#[tokio::test]
async fn set_then_verify() {
    let vault = vault_over(&MemoryStore::new());
    assert!(!vault.has_credential().await.expect("has"));
    vault.set_credential("abc123", "abc123").await.expect("set");
    assert!(vault.has_credential().await.expect("has"));

    assert!(vault.verify_credential("abc123").await.expect("verify"));
    assert!(!vault.verify_credential("abc124").await.expect("verify"));
    assert!(!vault.verify_credential("").await.expect("verify"));
}

#[tokio::test]
async fn set_rejects_mismatch_and_empty_fields() {
    let store = MemoryStore::new();
    let vault = vault_over(&store);

    for (password, confirmation) in [("abc", "abd"), ("", ""), ("abc", ""), ("", "abc")] {
        assert!(matches!(
            vault.set_credential(password, confirmation).await,
            Err(VaultError::NoMatch)
        ));
    }
    assert!(store.keys().await.is_empty());
    assert!(matches!(
        vault.verify_credential("abc").await,
        Err(VaultError::VaultEmpty)
    ));
}

#[tokio::test]
async fn change_with_wrong_current_leaves_credential() {
    let store = MemoryStore::new();
    let vault = vault_over(&store);
    vault.set_credential("old", "old").await.expect("set");
    let before = stored_bytes(&store).await;

    assert!(matches!(
        vault.change_credential("wrong", "new", "new").await,
        Err(VaultError::WrongCurrent)
    ));
    assert_eq!(stored_bytes(&store).await, before);
    assert!(vault.verify_credential("old").await.expect("verify"));
}

#[tokio::test]
async fn change_validates_before_touching_the_store() {
    let vault = vault_over(&MemoryStore::new());
    vault.set_credential("old", "old").await.expect("set");

    assert!(matches!(
        vault.change_credential("", "new", "new").await,
        Err(VaultError::NoMatch)
    ));
    assert!(matches!(
        vault.change_credential("old", "new", "newer").await,
        Err(VaultError::NoMatch)
    ));
    assert!(matches!(
        vault.change_credential("old", "", "").await,
        Err(VaultError::NoMatch)
    ));
    assert!(vault.verify_credential("old").await.expect("verify"));
}

#[tokio::test]
async fn change_replaces_credential() {
    let store = MemoryStore::new();
    let vault = vault_over(&store);
    vault.set_credential("old", "old").await.expect("set");
    let before = stored_bytes(&store).await;

    vault.change_credential("old", "new", "new").await.expect("change");
    assert_ne!(stored_bytes(&store).await, before);
    assert!(vault.verify_credential("new").await.expect("verify"));
    assert!(!vault.verify_credential("old").await.expect("verify"));
}

#[tokio::test]
async fn change_without_credential_is_vault_empty() {
    let vault = vault_over(&MemoryStore::new());
    assert!(matches!(
        vault.change_credential("old", "new", "new").await,
        Err(VaultError::VaultEmpty)
    ));
}

#[tokio::test]
async fn garbage_in_store_is_malformed() {
    let store = MemoryStore::new();
    let vault = vault_over(&store);
    for garbage in ["%%% not base64 %%%", "AAAA"] {
        store.put_text(CREDENTIAL_KEY, garbage).await.expect("write");
        assert!(matches!(
            vault.verify_credential("x").await,
            Err(VaultError::MalformedBlob)
        ));
    }
}

#[tokio::test]
async fn credential_survives_vault_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MemoryStore::new();
    {
        let keys = SoftwareKeystore::open(dir.path()).expect("keystore");
        let vault = CredentialVault::new(Arc::new(keys), Arc::new(store.clone()), "persisted");
        vault.set_credential("abc123", "abc123").await.expect("set");
    }

    let keys = SoftwareKeystore::open(dir.path()).expect("keystore");
    let vault = CredentialVault::new(Arc::new(keys), Arc::new(store), "persisted");
    assert!(vault.verify_credential("abc123").await.expect("verify"));
}

#[tokio::test]
async fn blob_from_another_key_fails_authentication() {
    let store = MemoryStore::new();
    let first = vault_over(&store);
    first.set_credential("abc123", "abc123").await.expect("set");

    let second = vault_over(&store);
    assert!(matches!(
        second.verify_credential("abc123").await,
        Err(VaultError::AuthFailure)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_change_and_verify_never_see_a_torn_blob() {
    let store = MemoryStore::new();
    let vault = Arc::new(vault_over(&store));
    vault.set_credential("p0", "p0").await.expect("set");

    let changer = {
        let vault = Arc::clone(&vault);
        tokio::spawn(async move {
            for i in 1..=20 {
                let current = format!("p{}", i - 1);
                let next = format!("p{i}");
                vault
                    .change_credential(&current, &next, &next)
                    .await
                    .expect("change");
            }
        })
    };

    let mut verifiers = Vec::new();
    for _ in 0..4 {
        let vault = Arc::clone(&vault);
        verifiers.push(tokio::spawn(async move {
            for _ in 0..50 {
                // Any outcome other than a clean bool means a partial read.
                vault.verify_credential("p7").await.expect("verify");
            }
        }));
    }

    changer.await.expect("changer");
    for verifier in verifiers {
        verifier.await.expect("verifier");
    }
    assert!(vault.verify_credential("p20").await.expect("verify"));
}
