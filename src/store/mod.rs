//! Boundary to the underlying document database.
//!
//! The encryption layer wraps a [`CosmosClient`] and never talks to the
//! network itself. [`InMemoryCosmosClient`] is a complete implementation
//! for tests and local development.

mod memory;
mod patch;
mod query;
mod types;

use async_trait::async_trait;

pub use memory::InMemoryCosmosClient;
pub use types::*;

use crate::key_store::ClientEncryptionKeyProperties;

// ============================================================================
// CosmosClient: user-provided database client
// ============================================================================

/// Data and resource operations the encryption layer consumes.
///
/// Implementations map each call onto the database's own protocol. Errors
/// are reported as [`CosmosError`] status errors and passed through the
/// encryption layer unchanged.
#[async_trait]
pub trait CosmosClient: Send + Sync {
    // ------------------------------------------------------------------------
    // Databases
    // ------------------------------------------------------------------------

    async fn create_database(&self, database_id: &str) -> CosmosResult<DatabaseProperties>;

    async fn delete_database(&self, database_id: &str) -> CosmosResult<()>;

    // ------------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------------

    async fn create_container(
        &self,
        database_id: &str,
        properties: ContainerProperties,
    ) -> CosmosResult<ContainerProperties>;

    async fn read_container(
        &self,
        database_id: &str,
        container_id: &str,
    ) -> CosmosResult<ContainerProperties>;

    async fn delete_container(&self, database_id: &str, container_id: &str) -> CosmosResult<()>;

    // ------------------------------------------------------------------------
    // Client encryption keys
    // ------------------------------------------------------------------------

    async fn create_client_encryption_key(
        &self,
        database_id: &str,
        properties: ClientEncryptionKeyProperties,
    ) -> CosmosResult<ClientEncryptionKeyProperties>;

    async fn read_client_encryption_key(
        &self,
        database_id: &str,
        key_id: &str,
    ) -> CosmosResult<ClientEncryptionKeyProperties>;

    async fn replace_client_encryption_key(
        &self,
        database_id: &str,
        properties: ClientEncryptionKeyProperties,
    ) -> CosmosResult<ClientEncryptionKeyProperties>;

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    async fn create_item(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse>;

    async fn upsert_item(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse>;

    async fn replace_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse>;

    async fn read_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse>;

    async fn delete_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse>;

    async fn patch_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        operations: Vec<PatchOperation>,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse>;

    /// Execute operations atomically within one logical partition.
    ///
    /// A failed batch is not an `Err`: the response carries the failing
    /// operation's status and 424 for every other operation.
    async fn execute_batch(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        operations: Vec<BatchOperation>,
        options: &RequestOptions,
    ) -> CosmosResult<BatchResponse>;

    // ------------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------------

    async fn query_items(
        &self,
        database_id: &str,
        container_id: &str,
        query: &QuerySpec,
        options: &FeedOptions,
    ) -> CosmosResult<FeedPage>;

    /// Read changes in modification order, starting after the continuation.
    async fn read_change_feed(
        &self,
        database_id: &str,
        container_id: &str,
        options: &FeedOptions,
    ) -> CosmosResult<FeedPage>;
}
