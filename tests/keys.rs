//! Client encryption key store: create, rewrap, validation and key caching.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use cosmos_encryption::error::RESOLVER_NAME_MISMATCH_MESSAGE;
use cosmos_encryption::{
    ClientEncryptionIncludedPath, ClientEncryptionPolicy, ContainerProperties, CosmosClient,
    EncryptionClient, EncryptionClientOptions, EncryptionKeyWrapMetadata, EncryptionType,
    ErrorKind, ItemRequestOptions, PartitionKey, AEAD_AES_256_CBC_HMAC_SHA256,
};

fn pk(value: &str) -> PartitionKey {
    PartitionKey::from(value)
}

#[tokio::test]
async fn created_key_is_wrapped_under_the_kek() {
    let fx = setup().await;
    let properties = fx
        .database
        .read_client_encryption_key("key1")
        .await
        .unwrap();
    assert_eq!(properties.id, "key1");
    assert_eq!(properties.encryption_algorithm, AEAD_AES_256_CBC_HMAC_SHA256);
    assert_eq!(properties.encryption_key_wrap_metadata, wrap_metadata("key1-kek"));
    assert_eq!(properties.wrapped_data_encryption_key.len(), 32);
    assert!(properties.etag.is_some());
    assert_eq!(fx.provider.wrap_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_algorithm_is_rejected_without_side_effects() {
    let fx = setup().await;
    let err = fx
        .database
        .create_client_encryption_key("key3", "AES_256_GCM", wrap_metadata("kek"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_string(), "Invalid Encryption Algorithm 'AES_256_GCM'");
    assert_eq!(fx.provider.wrap_calls.load(Ordering::SeqCst), 2);

    let err = fx
        .store
        .read_client_encryption_key(DATABASE_ID, "key3")
        .await
        .unwrap_err();
    assert_eq!(err.status_code, 404);
}

#[tokio::test]
async fn resolver_name_mismatch_is_rejected_on_create_and_rewrap() {
    let fx = setup().await;
    let foreign = EncryptionKeyWrapMetadata::new("OTHER_RESOLVER", "kek", "kek/x", "RSA-OAEP");

    let err = fx
        .database
        .create_client_encryption_key("key3", AEAD_AES_256_CBC_HMAC_SHA256, foreign.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.to_string(), RESOLVER_NAME_MISMATCH_MESSAGE);

    let before = fx
        .store
        .read_client_encryption_key(DATABASE_ID, "key1")
        .await
        .unwrap();
    let err = fx
        .database
        .rewrap_client_encryption_key("key1", foreign)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), RESOLVER_NAME_MISMATCH_MESSAGE);
    let after = fx
        .store
        .read_client_encryption_key(DATABASE_ID, "key1")
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn rewrap_keeps_existing_items_readable() {
    let fx = setup().await;
    let doc = test_doc("1", "pk1");
    fx.container
        .create_item(&doc, &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();
    let before = fx
        .store
        .read_client_encryption_key(DATABASE_ID, "key1")
        .await
        .unwrap();
    let key_reads = fx.counting.key_reads();

    let rewrapped = fx
        .database
        .rewrap_client_encryption_key("key1", wrap_metadata("rotated-kek"))
        .await
        .unwrap();
    assert_eq!(rewrapped.encryption_key_wrap_metadata, wrap_metadata("rotated-kek"));
    assert_ne!(
        rewrapped.wrapped_data_encryption_key,
        before.wrapped_data_encryption_key
    );
    assert_ne!(rewrapped.etag, before.etag);

    // One read for the rewrap itself, one to resolve the dropped cache entry.
    let read = fx
        .container
        .read_item::<TestDoc>("1", &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();
    assert_eq!(read.item, Some(doc.clone()));
    assert_eq!(fx.counting.key_reads(), key_reads + 2);

    // A client with a cold cache unwraps under the new KEK.
    let fresh = build_client(fx.counting.clone(), fx.provider.clone());
    let read = fresh
        .get_database(DATABASE_ID)
        .get_container(CONTAINER_ID)
        .read_item::<TestDoc>("1", &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();
    assert_eq!(read.item, Some(doc));
}

#[tokio::test]
async fn missing_key_fails_item_operations() {
    let fx = setup().await;
    let policy = ClientEncryptionPolicy::new(vec![ClientEncryptionIncludedPath::new(
        "/sensitiveString",
        "no-such-key",
        EncryptionType::Deterministic,
    )])
    .unwrap();
    let container = fx
        .database
        .create_container(
            ContainerProperties::new("orphan", "/pk").with_client_encryption_policy(policy),
        )
        .await
        .unwrap();

    let err = container
        .create_item(&test_doc("1", "pk1"), &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(404));
}

#[tokio::test(start_paused = true)]
async fn key_cache_ttl_expires_unwrapped_keys() {
    let fx = setup().await;
    fx.container
        .create_item(&test_doc("1", "pk1"), &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();

    let client = EncryptionClient::builder()
        .cosmos_client(fx.counting.clone())
        .key_encryption_key_resolver(fx.provider.clone())
        .key_encryption_key_resolver_name(RESOLVER_NAME)
        .options(EncryptionClientOptions {
            key_cache_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        })
        .build()
        .unwrap();
    let container = client.get_database(DATABASE_ID).get_container(CONTAINER_ID);
    let (key, options) = (pk("pk1"), ItemRequestOptions::default());
    let read = || container.read_item::<TestDoc>("1", &key, &options);

    let unwraps = fx.provider.unwraps();
    read().await.unwrap();
    assert_eq!(fx.provider.unwraps(), unwraps + 2);

    tokio::time::advance(Duration::from_secs(30)).await;
    read().await.unwrap();
    assert_eq!(fx.provider.unwraps(), unwraps + 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    read().await.unwrap();
    assert_eq!(fx.provider.unwraps(), unwraps + 4);
}

#[tokio::test]
async fn aes_key_wrap_provider_end_to_end() {
    use cosmos_encryption::{AesKeyWrapProvider, InMemoryCosmosClient, A256KW, AES_KEY_WRAP_RESOLVER_NAME};

    let provider = Arc::new(AesKeyWrapProvider::new());
    provider.generate_key("kek1").unwrap();
    provider.generate_key("kek2").unwrap();
    let client = EncryptionClient::builder()
        .cosmos_client(Arc::new(InMemoryCosmosClient::new()))
        .key_encryption_key_resolver(provider)
        .key_encryption_key_resolver_name(AES_KEY_WRAP_RESOLVER_NAME)
        .build()
        .unwrap();

    let database = client.create_database("db").await.unwrap();
    let metadata = |kek: &str| EncryptionKeyWrapMetadata::new(AES_KEY_WRAP_RESOLVER_NAME, kek, kek, A256KW);
    database
        .create_client_encryption_key("cek", AEAD_AES_256_CBC_HMAC_SHA256, metadata("kek1"))
        .await
        .unwrap();
    let policy = ClientEncryptionPolicy::new(vec![ClientEncryptionIncludedPath::new(
        "/sensitiveString",
        "cek",
        EncryptionType::Deterministic,
    )])
    .unwrap();
    let container = database
        .create_container(ContainerProperties::new("c", "/pk").with_client_encryption_policy(policy))
        .await
        .unwrap();

    let doc = test_doc("1", "pk1");
    container
        .create_item(&doc, &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();
    database
        .rewrap_client_encryption_key("cek", metadata("kek2"))
        .await
        .unwrap();
    let read = container
        .read_item::<TestDoc>("1", &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();
    assert_eq!(read.item, Some(doc));
}
