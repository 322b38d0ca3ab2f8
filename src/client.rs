//! Encryption client, its builder, and database handles.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::EncryptionCache;
use crate::container::EncryptionContainer;
use crate::error::{EncryptionError, Result};
use crate::key_wrap::KeyWrapProvider;
use crate::options::EncryptionClientOptions;
use crate::serializer::{DefaultItemSerializer, ItemSerializer};
use crate::store::{ContainerProperties, CosmosClient};

/// State shared by a client and every handle derived from it.
pub(crate) struct ClientInner {
    pub cosmos: Arc<dyn CosmosClient>,
    pub provider: Arc<dyn KeyWrapProvider>,
    pub resolver_name: String,
    pub cache: EncryptionCache,
    pub options: EncryptionClientOptions,
    pub serializer: Arc<dyn ItemSerializer>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builds an [`EncryptionClient`]. The database client, key wrap provider
/// and resolver name are required and checked in that order.
#[derive(Default)]
pub struct EncryptionClientBuilder {
    cosmos: Option<Arc<dyn CosmosClient>>,
    provider: Option<Arc<dyn KeyWrapProvider>>,
    resolver_name: Option<String>,
    options: EncryptionClientOptions,
    cache: Option<EncryptionCache>,
    serializer: Option<Arc<dyn ItemSerializer>>,
}

impl EncryptionClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cosmos_client(mut self, client: Arc<dyn CosmosClient>) -> Self {
        self.cosmos = Some(client);
        self
    }

    pub fn key_encryption_key_resolver(mut self, provider: Arc<dyn KeyWrapProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn key_encryption_key_resolver_name(mut self, name: impl Into<String>) -> Self {
        self.resolver_name = Some(name.into());
        self
    }

    pub fn options(mut self, options: EncryptionClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Share caches with other clients built from clones of `cache`.
    pub fn cache(mut self, cache: EncryptionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn item_serializer(mut self, serializer: Arc<dyn ItemSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn build(self) -> Result<EncryptionClient> {
        let cosmos = self.cosmos.ok_or_else(|| {
            EncryptionError::Configuration("CosmosAsyncClient has not been provided.".to_string())
        })?;
        let provider = self.provider.ok_or_else(|| {
            EncryptionError::Configuration(
                "KeyEncryptionKeyResolver has not been provided.".to_string(),
            )
        })?;
        let resolver_name = self
            .resolver_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                EncryptionError::Configuration(
                    "KeyEncryptionKeyResolverName has not been provided.".to_string(),
                )
            })?;

        let cache = self
            .cache
            .unwrap_or_else(|| EncryptionCache::with_key_ttl(self.options.key_cache_ttl));
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(DefaultItemSerializer));

        info!(resolver_name = %resolver_name, "built encryption client");
        Ok(EncryptionClient {
            inner: Arc::new(ClientInner {
                cosmos,
                provider,
                resolver_name,
                cache,
                options: self.options,
                serializer,
            }),
        })
    }
}

// ============================================================================
// EncryptionClient
// ============================================================================

/// Wraps a [`CosmosClient`] with transparent field-level encryption.
#[derive(Clone)]
pub struct EncryptionClient {
    inner: Arc<ClientInner>,
}

impl EncryptionClient {
    pub fn builder() -> EncryptionClientBuilder {
        EncryptionClientBuilder::new()
    }

    pub fn key_encryption_key_resolver_name(&self) -> &str {
        &self.inner.resolver_name
    }

    pub fn cosmos_client(&self) -> &Arc<dyn CosmosClient> {
        &self.inner.cosmos
    }

    pub fn cache(&self) -> &EncryptionCache {
        &self.inner.cache
    }

    pub fn get_database(&self, database_id: impl Into<String>) -> EncryptionDatabase {
        EncryptionDatabase {
            inner: self.inner.clone(),
            id: database_id.into(),
        }
    }

    /// Create a database through the wrapped client.
    pub async fn create_database(&self, database_id: &str) -> Result<EncryptionDatabase> {
        self.inner.cosmos.create_database(database_id).await?;
        Ok(self.get_database(database_id))
    }

    pub fn invalidate_container(&self, database_id: &str, container_id: &str) -> bool {
        self.inner.cache.invalidate_container(database_id, container_id)
    }

    pub fn invalidate_client_encryption_key(&self, database_id: &str, key_id: &str) -> bool {
        self.inner
            .cache
            .invalidate_client_encryption_key(database_id, key_id)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }
}

// ============================================================================
// EncryptionDatabase
// ============================================================================

/// Database handle. Client encryption key operations live in
/// [`key_store`](crate::key_store).
#[derive(Clone)]
pub struct EncryptionDatabase {
    pub(crate) inner: Arc<ClientInner>,
    pub(crate) id: String,
}

impl EncryptionDatabase {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get_container(&self, container_id: impl Into<String>) -> EncryptionContainer {
        EncryptionContainer::new(self.inner.clone(), self.id.clone(), container_id.into())
    }

    /// Create a container after validating its encryption policy.
    pub async fn create_container(&self, properties: ContainerProperties) -> Result<EncryptionContainer> {
        if let Some(policy) = &properties.client_encryption_policy {
            policy.validate_for_container(&properties.partition_key_path)?;
        }
        let created = self
            .inner
            .cosmos
            .create_container(&self.id, properties)
            .await?;
        debug!(database_id = %self.id, container_id = %created.id, "created container");
        Ok(self.get_container(created.id))
    }

    pub async fn delete(&self) -> Result<()> {
        self.inner.cosmos.delete_database(&self.id).await?;
        Ok(())
    }
}
