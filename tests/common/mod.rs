//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cosmos_encryption::store::{
    BatchOperation, BatchResponse, CosmosResult, DatabaseProperties, DocumentResponse, FeedOptions,
    FeedPage, RequestOptions,
};
use cosmos_encryption::{
    ClientEncryptionIncludedPath, ClientEncryptionKeyProperties, ClientEncryptionPolicy,
    ContainerProperties, CosmosClient, EncryptionClient, EncryptionContainer, EncryptionDatabase,
    EncryptionKeyWrapMetadata, EncryptionType, InMemoryCosmosClient, KeyWrapError,
    KeyWrapProvider, PartitionKey, PatchOperation, QuerySpec, AEAD_AES_256_CBC_HMAC_SHA256,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RESOLVER_NAME: &str = "SHIFT_RESOLVER";
pub const DATABASE_ID: &str = "encryption-db";
pub const CONTAINER_ID: &str = "items";

// ============================================================================
// Shift-cipher key wrap provider
// ============================================================================

/// Deterministic stand-in for a KMS: wrapping adds a per-KEK shift to every
/// byte. Counts wrap and unwrap calls.
#[derive(Default)]
pub struct ShiftKeyWrapProvider {
    pub wrap_calls: AtomicUsize,
    pub unwrap_calls: AtomicUsize,
}

impl ShiftKeyWrapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn shift(key_id: &str) -> u8 {
        key_id.bytes().fold(1u8, |acc, b| acc.wrapping_add(b))
    }

    pub fn unwraps(&self) -> usize {
        self.unwrap_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyWrapProvider for ShiftKeyWrapProvider {
    async fn wrap_key(
        &self,
        key_id: &str,
        _algorithm: &str,
        key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError> {
        self.wrap_calls.fetch_add(1, Ordering::SeqCst);
        let shift = Self::shift(key_id);
        Ok(key.iter().map(|b| b.wrapping_add(shift)).collect())
    }

    async fn unwrap_key(
        &self,
        key_id: &str,
        _algorithm: &str,
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError> {
        self.unwrap_calls.fetch_add(1, Ordering::SeqCst);
        let shift = Self::shift(key_id);
        Ok(wrapped_key.iter().map(|b| b.wrapping_sub(shift)).collect())
    }

    async fn sign(
        &self,
        key_id: &str,
        allow_enclave_computations: bool,
    ) -> Result<Vec<u8>, KeyWrapError> {
        let mut signature = key_id.as_bytes().to_vec();
        signature.push(u8::from(allow_enclave_computations));
        Ok(signature)
    }

    async fn verify(
        &self,
        key_id: &str,
        allow_enclave_computations: bool,
        signature: &[u8],
    ) -> Result<bool, KeyWrapError> {
        Ok(self.sign(key_id, allow_enclave_computations).await? == signature)
    }
}

// ============================================================================
// Call-counting database client
// ============================================================================

/// Wraps [`InMemoryCosmosClient`], counting the resource reads the caches
/// are supposed to absorb. `item_delay` stalls item reads for timeout tests.
pub struct CountingCosmosClient {
    pub inner: Arc<InMemoryCosmosClient>,
    pub container_reads: AtomicUsize,
    pub key_reads: AtomicUsize,
    pub queries: AtomicUsize,
    pub item_delay: Mutex<Option<Duration>>,
}

impl CountingCosmosClient {
    pub fn new(inner: Arc<InMemoryCosmosClient>) -> Self {
        Self {
            inner,
            container_reads: AtomicUsize::new(0),
            key_reads: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            item_delay: Mutex::new(None),
        }
    }

    pub fn container_reads(&self) -> usize {
        self.container_reads.load(Ordering::SeqCst)
    }

    pub fn key_reads(&self) -> usize {
        self.key_reads.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CosmosClient for CountingCosmosClient {
    async fn create_database(&self, database_id: &str) -> CosmosResult<DatabaseProperties> {
        self.inner.create_database(database_id).await
    }

    async fn delete_database(&self, database_id: &str) -> CosmosResult<()> {
        self.inner.delete_database(database_id).await
    }

    async fn create_container(
        &self,
        database_id: &str,
        properties: ContainerProperties,
    ) -> CosmosResult<ContainerProperties> {
        self.inner.create_container(database_id, properties).await
    }

    async fn read_container(
        &self,
        database_id: &str,
        container_id: &str,
    ) -> CosmosResult<ContainerProperties> {
        self.container_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_container(database_id, container_id).await
    }

    async fn delete_container(&self, database_id: &str, container_id: &str) -> CosmosResult<()> {
        self.inner.delete_container(database_id, container_id).await
    }

    async fn create_client_encryption_key(
        &self,
        database_id: &str,
        properties: ClientEncryptionKeyProperties,
    ) -> CosmosResult<ClientEncryptionKeyProperties> {
        self.inner
            .create_client_encryption_key(database_id, properties)
            .await
    }

    async fn read_client_encryption_key(
        &self,
        database_id: &str,
        key_id: &str,
    ) -> CosmosResult<ClientEncryptionKeyProperties> {
        self.key_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_client_encryption_key(database_id, key_id).await
    }

    async fn replace_client_encryption_key(
        &self,
        database_id: &str,
        properties: ClientEncryptionKeyProperties,
    ) -> CosmosResult<ClientEncryptionKeyProperties> {
        self.inner
            .replace_client_encryption_key(database_id, properties)
            .await
    }

    async fn create_item(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        document: cosmos_encryption::store::Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        self.inner
            .create_item(database_id, container_id, partition_key, document, options)
            .await
    }

    async fn upsert_item(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        document: cosmos_encryption::store::Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        self.inner
            .upsert_item(database_id, container_id, partition_key, document, options)
            .await
    }

    async fn replace_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        document: cosmos_encryption::store::Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        self.inner
            .replace_item(database_id, container_id, id, partition_key, document, options)
            .await
    }

    async fn read_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        let delay = *self.item_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner
            .read_item(database_id, container_id, id, partition_key, options)
            .await
    }

    async fn delete_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        self.inner
            .delete_item(database_id, container_id, id, partition_key, options)
            .await
    }

    async fn patch_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: Vec<PatchOperation>,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        self.inner
            .patch_item(database_id, container_id, id, partition_key, operations, options)
            .await
    }

    async fn execute_batch(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        operations: Vec<BatchOperation>,
        options: &RequestOptions,
    ) -> CosmosResult<BatchResponse> {
        self.inner
            .execute_batch(database_id, container_id, partition_key, operations, options)
            .await
    }

    async fn query_items(
        &self,
        database_id: &str,
        container_id: &str,
        query_spec: &QuerySpec,
        options: &FeedOptions,
    ) -> CosmosResult<FeedPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner
            .query_items(database_id, container_id, query_spec, options)
            .await
    }

    async fn read_change_feed(
        &self,
        database_id: &str,
        container_id: &str,
        options: &FeedOptions,
    ) -> CosmosResult<FeedPage> {
        self.inner
            .read_change_feed(database_id, container_id, options)
            .await
    }
}

// ============================================================================
// Test document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedPojo {
    pub id: String,
    pub sensitive_string: String,
    pub sensitive_int: i32,
    pub sensitive_child: Option<Box<NestedPojo>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDoc {
    pub id: String,
    pub pk: String,
    pub nonsensitive: String,
    pub sensitive_string: String,
    pub sensitive_int: i32,
    pub sensitive_long: i64,
    pub sensitive_float: f32,
    pub sensitive_double: f64,
    pub sensitive_bool: bool,
    pub sensitive_nested: NestedPojo,
    pub sensitive_int_array: Vec<i32>,
    pub sensitive_string_array_2d: Vec<Vec<String>>,
    pub sensitive_long_array_3d: Vec<Vec<Vec<i64>>>,
    pub sensitive_children: Vec<NestedPojo>,
    pub sensitive_children_2d: Vec<Vec<NestedPojo>>,
    pub sensitive_optional: Option<String>,
}

/// Properties encrypted by [`test_policy`] with the given mode.
pub const ENCRYPTED_PROPERTIES: &[&str] = &[
    "sensitiveString",
    "sensitiveInt",
    "sensitiveLong",
    "sensitiveFloat",
    "sensitiveDouble",
    "sensitiveBool",
    "sensitiveNested",
    "sensitiveIntArray",
    "sensitiveStringArray2d",
    "sensitiveLongArray3d",
    "sensitiveChildren",
    "sensitiveChildren2d",
    "sensitiveOptional",
];

fn child(id: &str, depth: usize) -> NestedPojo {
    NestedPojo {
        id: id.to_string(),
        sensitive_string: format!("child-{}", id),
        sensitive_int: 7,
        sensitive_child: (depth > 0).then(|| Box::new(child(&format!("{}-inner", id), depth - 1))),
    }
}

/// Item with every supported value shape under an encrypted property.
pub fn test_doc(id: &str, pk: &str) -> TestDoc {
    TestDoc {
        id: id.to_string(),
        pk: pk.to_string(),
        nonsensitive: "plain".to_string(),
        sensitive_string: "testingString".to_string(),
        sensitive_int: 30,
        sensitive_long: 1_234_567_890_123,
        sensitive_float: 10.5,
        sensitive_double: 12.25,
        sensitive_bool: true,
        sensitive_nested: child("nested", 2),
        sensitive_int_array: vec![1, -2, 3],
        sensitive_string_array_2d: vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ],
        sensitive_long_array_3d: vec![vec![vec![1, 2], vec![3]], vec![vec![i64::MAX]]],
        sensitive_children: vec![child("c1", 0), child("c2", 1)],
        sensitive_children_2d: vec![vec![child("d1", 0)], vec![child("d2", 0), child("d3", 0)]],
        sensitive_optional: None,
    }
}

// ============================================================================
// Setup
// ============================================================================

pub fn wrap_metadata(kek_name: &str) -> EncryptionKeyWrapMetadata {
    EncryptionKeyWrapMetadata::new(RESOLVER_NAME, kek_name, format!("kek/{}", kek_name), "RSA-OAEP")
}

/// Policy over [`ENCRYPTED_PROPERTIES`]: `sensitiveString` deterministic
/// under `key1`, `sensitiveInt` randomized under `key2`, everything else
/// `mode` under `key1`.
pub fn test_policy(mode: EncryptionType) -> ClientEncryptionPolicy {
    let paths = ENCRYPTED_PROPERTIES
        .iter()
        .map(|property| {
            let (key, encryption_type) = match *property {
                "sensitiveString" => ("key1", EncryptionType::Deterministic),
                "sensitiveInt" => ("key2", EncryptionType::Randomized),
                _ => ("key1", mode),
            };
            ClientEncryptionIncludedPath::new(format!("/{}", property), key, encryption_type)
        })
        .collect();
    ClientEncryptionPolicy::new(paths).expect("valid test policy")
}

pub struct Fixture {
    pub store: Arc<InMemoryCosmosClient>,
    pub counting: Arc<CountingCosmosClient>,
    pub provider: Arc<ShiftKeyWrapProvider>,
    pub client: EncryptionClient,
    pub database: EncryptionDatabase,
    pub container: EncryptionContainer,
}

pub fn build_client(
    counting: Arc<CountingCosmosClient>,
    provider: Arc<ShiftKeyWrapProvider>,
) -> EncryptionClient {
    EncryptionClient::builder()
        .cosmos_client(counting)
        .key_encryption_key_resolver(provider)
        .key_encryption_key_resolver_name(RESOLVER_NAME)
        .build()
        .expect("build client")
}

/// Database with `key1` and `key2` and a container using [`test_policy`].
pub async fn setup() -> Fixture {
    setup_with(EncryptionType::Deterministic).await
}

pub async fn setup_with(mode: EncryptionType) -> Fixture {
    let store = Arc::new(InMemoryCosmosClient::new());
    let counting = Arc::new(CountingCosmosClient::new(store.clone()));
    let provider = Arc::new(ShiftKeyWrapProvider::new());
    let client = build_client(counting.clone(), provider.clone());

    let database = client
        .create_database(DATABASE_ID)
        .await
        .expect("create database");
    for key_id in ["key1", "key2"] {
        database
            .create_client_encryption_key(
                key_id,
                AEAD_AES_256_CBC_HMAC_SHA256,
                wrap_metadata(&format!("{}-kek", key_id)),
            )
            .await
            .expect("create client encryption key");
    }
    let container = database
        .create_container(
            ContainerProperties::new(CONTAINER_ID, "/pk")
                .with_client_encryption_policy(test_policy(mode)),
        )
        .await
        .expect("create container");

    Fixture {
        store,
        counting,
        provider,
        client,
        database,
        container,
    }
}

impl Fixture {
    /// Stored form of an item, bypassing decryption.
    pub fn raw(&self, id: &str, pk: &str) -> serde_json::Map<String, Value> {
        self.store
            .raw_item(DATABASE_ID, CONTAINER_ID, id, &PartitionKey::from(pk))
            .expect("raw item")
    }
}
