//! Container handle: every item operation runs through
//! resolve settings → resolve keys → encrypt → store → decrypt.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::batch::{
    BulkOperation, BulkOperationKind, BulkOperationResult, PendingOperation, TransactionalBatch,
    TransactionalBatchOperationResult, TransactionalBatchResponse,
};
use crate::client::ClientInner;
use crate::error::{EncryptionError, Result};
use crate::key_store::{resolve_key, ResolvedKey};
use crate::options::{BulkExecutionOptions, ChangeFeedOptions, ItemRequestOptions, QueryOptions};
use crate::processor::{EncryptionContext, PathEncryption};
use crate::query::SqlQuerySpecWithEncryption;
use crate::settings::{fetch_container_settings, ContainerSettings};
use crate::store::{
    BatchOperation, ContainerProperties, Document, DocumentResponse, FeedOptions, PartitionKey,
    PatchOperation, QuerySpec,
};

// ============================================================================
// Responses
// ============================================================================

/// Point operation result. `item` is `None` for deletes and for writes with
/// content response disabled.
#[derive(Debug, Clone)]
pub struct ItemResponse<T> {
    pub status_code: u16,
    pub etag: Option<String>,
    pub item: Option<T>,
}

impl ItemResponse<Value> {
    fn into_typed<T: DeserializeOwned>(self) -> Result<ItemResponse<T>> {
        Ok(ItemResponse {
            status_code: self.status_code,
            etag: self.etag,
            item: self.item.map(serde_json::from_value).transpose()?,
        })
    }
}

/// One page of query or change feed results.
#[derive(Debug, Clone)]
pub struct FeedResponse<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

async fn with_timeout<T, F>(timeout: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| EncryptionError::Timeout(limit))?,
        None => future.await,
    }
}

enum WriteKind<'a> {
    Create,
    Upsert,
    Replace(&'a str),
}

// ============================================================================
// EncryptionContainer
// ============================================================================

#[derive(Clone)]
pub struct EncryptionContainer {
    inner: Arc<ClientInner>,
    database_id: String,
    id: String,
}

impl EncryptionContainer {
    pub(crate) fn new(inner: Arc<ClientInner>, database_id: String, id: String) -> Self {
        Self {
            inner,
            database_id,
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    fn timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        requested.or(self.inner.options.default_timeout)
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    pub(crate) async fn settings(&self) -> Result<Arc<ContainerSettings>> {
        let cache_key = format!("{}/{}", self.database_id, self.id);
        self.inner
            .cache
            .containers()
            .get_or_try_init(&cache_key, || async {
                let settings =
                    fetch_container_settings(&self.inner, &self.database_id, &self.id).await?;
                Ok(Arc::new(settings))
            })
            .await
    }

    pub(crate) async fn encryption_context(&self) -> Result<EncryptionContext> {
        let settings = self.settings().await?;
        let policy = match settings.policy.as_ref() {
            Some(policy) if settings.has_encrypted_paths() => policy,
            _ => return Ok(EncryptionContext::default()),
        };

        let mut keys: HashMap<&str, Arc<ResolvedKey>> = HashMap::new();
        for key_id in policy.key_ids() {
            let key = resolve_key(&self.inner, &self.database_id, key_id).await?;
            keys.insert(key_id, key);
        }

        Ok(EncryptionContext::new(policy.included_paths.iter().filter_map(
            |included| {
                keys.get(included.client_encryption_key_id.as_str())
                    .map(|key| PathEncryption {
                        included: included.clone(),
                        key: key.clone(),
                    })
            },
        )))
    }

    /// Resolve the container's policy and every key it references, so the
    /// first item operation does not pay for it.
    pub async fn initialize_encryption(&self) -> Result<()> {
        let settings = self.settings().await?;
        let context = self.encryption_context().await?;
        debug!(
            database_id = %self.database_id,
            container_id = %settings.container_id,
            resource_id = %settings.resource_id,
            partition_key_path = %settings.partition_key_path,
            encrypted = !context.is_empty(),
            "initialized encryption"
        );
        Ok(())
    }

    /// Container properties straight from the store, bypassing the cache.
    pub async fn read_container(&self) -> Result<ContainerProperties> {
        Ok(self
            .inner
            .cosmos
            .read_container(&self.database_id, &self.id)
            .await?)
    }

    /// Delete the container. Cached settings are left in place.
    pub async fn delete_container(&self) -> Result<()> {
        self.inner
            .cosmos
            .delete_container(&self.database_id, &self.id)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Document conversion
    // ------------------------------------------------------------------------

    fn encode(&self, context: &EncryptionContext, item: Value) -> Result<Document> {
        let mut document = self.inner.serializer.to_document(item)?;
        context.encrypt_document(&mut document)?;
        Ok(document)
    }

    fn decode(&self, context: &EncryptionContext, mut document: Document) -> Result<Value> {
        context.decrypt_document(&mut document)?;
        self.inner.serializer.from_document(document)
    }

    fn decode_response(
        &self,
        context: &EncryptionContext,
        response: DocumentResponse,
    ) -> Result<ItemResponse<Value>> {
        Ok(ItemResponse {
            status_code: response.status_code,
            etag: response.etag,
            item: response
                .document
                .map(|document| self.decode(context, document))
                .transpose()?,
        })
    }

    // ------------------------------------------------------------------------
    // Point operations
    // ------------------------------------------------------------------------

    async fn write_value(
        &self,
        kind: WriteKind<'_>,
        item: Value,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<Value>> {
        with_timeout(self.timeout(options.timeout), async {
            let context = self.encryption_context().await?;
            let document = self.encode(&context, item)?;
            let cosmos = &self.inner.cosmos;
            let (db, container, request) = (&self.database_id, &self.id, &options.request);
            let response = match kind {
                WriteKind::Create => {
                    cosmos
                        .create_item(db, container, partition_key, document, request)
                        .await?
                }
                WriteKind::Upsert => {
                    cosmos
                        .upsert_item(db, container, partition_key, document, request)
                        .await?
                }
                WriteKind::Replace(id) => {
                    cosmos
                        .replace_item(db, container, id, partition_key, document, request)
                        .await?
                }
            };
            self.decode_response(&context, response)
        })
        .await
    }

    async fn read_value(
        &self,
        id: &str,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<Value>> {
        with_timeout(self.timeout(options.timeout), async {
            let context = self.encryption_context().await?;
            let response = self
                .inner
                .cosmos
                .read_item(&self.database_id, &self.id, id, partition_key, &options.request)
                .await?;
            self.decode_response(&context, response)
        })
        .await
    }

    async fn delete_value(
        &self,
        id: &str,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<Value>> {
        with_timeout(self.timeout(options.timeout), async {
            let response = self
                .inner
                .cosmos
                .delete_item(&self.database_id, &self.id, id, partition_key, &options.request)
                .await?;
            Ok(ItemResponse {
                status_code: response.status_code,
                etag: response.etag,
                item: None,
            })
        })
        .await
    }

    pub async fn create_item<T>(
        &self,
        item: &T,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = serde_json::to_value(item)?;
        self.write_value(WriteKind::Create, value, partition_key, options)
            .await?
            .into_typed()
    }

    pub async fn upsert_item<T>(
        &self,
        item: &T,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = serde_json::to_value(item)?;
        self.write_value(WriteKind::Upsert, value, partition_key, options)
            .await?
            .into_typed()
    }

    pub async fn replace_item<T>(
        &self,
        item: &T,
        id: &str,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = serde_json::to_value(item)?;
        self.write_value(WriteKind::Replace(id), value, partition_key, options)
            .await?
            .into_typed()
    }

    pub async fn read_item<T: DeserializeOwned>(
        &self,
        id: &str,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<T>> {
        self.read_value(id, partition_key, options)
            .await?
            .into_typed()
    }

    pub async fn delete_item(
        &self,
        id: &str,
        partition_key: &PartitionKey,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<()>> {
        let response = self.delete_value(id, partition_key, options).await?;
        Ok(ItemResponse {
            status_code: response.status_code,
            etag: response.etag,
            item: None,
        })
    }

    // ------------------------------------------------------------------------
    // Patch
    // ------------------------------------------------------------------------

    /// Apply patch operations. Values written under an encrypted path are
    /// encrypted with that path's settings; `increment` on an encrypted path
    /// is rejected before the request is sent.
    pub async fn patch_item<T: DeserializeOwned>(
        &self,
        id: &str,
        partition_key: &PartitionKey,
        mut operations: Vec<PatchOperation>,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<T>> {
        with_timeout(self.timeout(options.timeout), async {
            let context = self.encryption_context().await?;
            context.encrypt_patch_operations(&mut operations)?;
            let response = self
                .inner
                .cosmos
                .patch_item(
                    &self.database_id,
                    &self.id,
                    id,
                    partition_key,
                    operations,
                    &options.request,
                )
                .await?;
            self.decode_response(&context, response)
        })
        .await?
        .into_typed()
    }

    // ------------------------------------------------------------------------
    // Transactional batch
    // ------------------------------------------------------------------------

    /// Execute a batch atomically. A failed batch is returned as a response
    /// with per-operation status codes, not as an error.
    pub async fn execute_batch(
        &self,
        batch: TransactionalBatch,
        options: &ItemRequestOptions,
    ) -> Result<TransactionalBatchResponse> {
        let TransactionalBatch {
            partition_key,
            operations: pending_operations,
        } = batch;
        with_timeout(self.timeout(options.timeout), async {
            let context = self.encryption_context().await?;
            let mut operations = Vec::with_capacity(pending_operations.len());
            for pending in pending_operations {
                operations.push(match pending {
                    PendingOperation::Create(item) => BatchOperation::Create {
                        document: self.encode(&context, item)?,
                    },
                    PendingOperation::Upsert(item) => BatchOperation::Upsert {
                        document: self.encode(&context, item)?,
                    },
                    PendingOperation::Replace { id, item } => BatchOperation::Replace {
                        id,
                        document: self.encode(&context, item)?,
                    },
                    PendingOperation::Read { id } => BatchOperation::Read { id },
                    PendingOperation::Delete { id } => BatchOperation::Delete { id },
                    PendingOperation::Patch { id, mut operations } => {
                        context.encrypt_patch_operations(&mut operations)?;
                        BatchOperation::Patch { id, operations }
                    }
                });
            }

            let response = self
                .inner
                .cosmos
                .execute_batch(
                    &self.database_id,
                    &self.id,
                    &partition_key,
                    operations,
                    &options.request,
                )
                .await?;
            if !response.is_success() {
                warn!(
                    container_id = %self.id,
                    status = response.status_code,
                    "transactional batch failed"
                );
            }

            let results = response
                .results
                .into_iter()
                .map(|result| {
                    let (item, error) =
                        match result.document.map(|document| self.decode(&context, document)) {
                            Some(Ok(item)) => (Some(item), None),
                            Some(Err(err)) => {
                                warn!(
                                    container_id = %self.id,
                                    status = result.status_code,
                                    error = %err,
                                    "batch result could not be decrypted"
                                );
                                (None, Some(err))
                            }
                            None => (None, None),
                        };
                    TransactionalBatchOperationResult {
                        status_code: result.status_code,
                        etag: result.etag,
                        item,
                        error,
                    }
                })
                .collect();
            Ok(TransactionalBatchResponse {
                status_code: response.status_code,
                results,
            })
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Bulk
    // ------------------------------------------------------------------------

    async fn run_bulk_operation(
        &self,
        operation: BulkOperation,
        options: &ItemRequestOptions,
    ) -> Result<ItemResponse<Value>> {
        let partition_key = &operation.partition_key;
        match operation.kind {
            BulkOperationKind::Create(item) => {
                self.write_value(WriteKind::Create, item, partition_key, options)
                    .await
            }
            BulkOperationKind::Upsert(item) => {
                self.write_value(WriteKind::Upsert, item, partition_key, options)
                    .await
            }
            BulkOperationKind::Replace { id, item } => {
                self.write_value(WriteKind::Replace(&id), item, partition_key, options)
                    .await
            }
            BulkOperationKind::Read { id } => self.read_value(&id, partition_key, options).await,
            BulkOperationKind::Delete { id } => {
                self.delete_value(&id, partition_key, options).await
            }
        }
    }

    /// Run independent operations concurrently, at most
    /// `options.max_concurrency` at a time. Results are returned in input
    /// order; each carries its own success or failure.
    pub async fn execute_bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkExecutionOptions,
    ) -> Vec<BulkOperationResult> {
        let total = operations.len();
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, operation) in operations.into_iter().enumerate() {
            let container = self.clone();
            let item_options = options.item_options.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => container.run_bulk_operation(operation, &item_options).await,
                    Err(_) => Err(EncryptionError::Configuration(
                        "Bulk executor was shut down".to_string(),
                    )),
                };
                BulkOperationResult { index, result }
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Err(err) = &result.result {
                        warn!(index = result.index, error = %err, "bulk operation failed");
                    }
                    results.push(result);
                }
                Err(join_error) if join_error.is_panic() => {
                    std::panic::resume_unwind(join_error.into_panic())
                }
                Err(join_error) => warn!(error = %join_error, "bulk operation was cancelled"),
            }
        }
        results.sort_by_key(|result| result.index);
        debug!(container_id = %self.id, total, "bulk execution finished");
        results
    }

    // ------------------------------------------------------------------------
    // Query and change feed
    // ------------------------------------------------------------------------

    /// Start a query. Encryption parameters are encrypted here, so a
    /// parameter bound to a randomized path fails before any page is fetched.
    pub async fn query_items<T: DeserializeOwned>(
        &self,
        query: impl Into<SqlQuerySpecWithEncryption>,
        options: QueryOptions,
    ) -> Result<QueryPager<T>> {
        let query = query.into();
        let timeout = self.timeout(options.timeout);
        let context = with_timeout(timeout, self.encryption_context()).await?;
        let spec = query.encrypt(&context)?;
        Ok(QueryPager {
            container: self.clone(),
            context,
            spec,
            feed_options: FeedOptions {
                max_item_count: options.max_item_count,
                continuation: options.continuation,
                partition_key: options.partition_key,
                consistency_level: options.consistency_level,
            },
            timeout,
            finished: false,
            _item: PhantomData,
        })
    }

    /// Read the change feed page by page, starting after `options.continuation`.
    pub fn query_change_feed<T: DeserializeOwned>(
        &self,
        options: ChangeFeedOptions,
    ) -> ChangeFeedPager<T> {
        ChangeFeedPager {
            container: self.clone(),
            timeout: self.timeout(options.timeout),
            feed_options: FeedOptions {
                max_item_count: options.max_item_count,
                continuation: options.continuation,
                partition_key: options.partition_key,
                consistency_level: None,
            },
            _item: PhantomData,
        }
    }

    fn decode_page<T: DeserializeOwned>(
        &self,
        context: &EncryptionContext,
        documents: Vec<Document>,
    ) -> Result<Vec<T>> {
        documents
            .into_iter()
            .map(|document| Ok(serde_json::from_value(self.decode(context, document)?)?))
            .collect()
    }
}

// ============================================================================
// Pagers
// ============================================================================

/// Pages of a query, decrypted as they arrive. The container's settings are
/// resolved once, when the query starts.
pub struct QueryPager<T> {
    container: EncryptionContainer,
    context: EncryptionContext,
    spec: QuerySpec,
    feed_options: FeedOptions,
    timeout: Option<Duration>,
    finished: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryPager<T> {
    /// Query spec as sent to the store, with encrypted parameters.
    pub fn query_spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn continuation(&self) -> Option<&str> {
        self.feed_options.continuation.as_deref()
    }

    /// Fetch the next page, or `None` once the continuation is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<FeedResponse<T>>> {
        if self.finished {
            return Ok(None);
        }
        let container = &self.container;
        let (spec, feed_options) = (&self.spec, &self.feed_options);
        let page = with_timeout(self.timeout, async {
            Ok(container
                .inner
                .cosmos
                .query_items(&container.database_id, &container.id, spec, feed_options)
                .await?)
        })
        .await?;
        let items = container.decode_page(&self.context, page.documents)?;
        self.feed_options.continuation = page.continuation.clone();
        self.finished = page.continuation.is_none();
        Ok(Some(FeedResponse {
            items,
            continuation: page.continuation,
        }))
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page.items);
        }
        Ok(items)
    }
}

/// Change feed reader. Never finishes: an empty page means caught up, and
/// the returned continuation resumes from there.
pub struct ChangeFeedPager<T> {
    container: EncryptionContainer,
    feed_options: FeedOptions,
    timeout: Option<Duration>,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ChangeFeedPager<T> {
    pub fn continuation(&self) -> Option<&str> {
        self.feed_options.continuation.as_deref()
    }

    pub async fn next_page(&mut self) -> Result<FeedResponse<T>> {
        let container = &self.container;
        let feed_options = &self.feed_options;
        let (context, page) = with_timeout(self.timeout, async {
            let context = container.encryption_context().await?;
            let page = container
                .inner
                .cosmos
                .read_change_feed(&container.database_id, &container.id, feed_options)
                .await?;
            Ok((context, page))
        })
        .await?;
        let items = container.decode_page(&context, page.documents)?;
        if page.continuation.is_some() {
            self.feed_options.continuation = page.continuation.clone();
        }
        Ok(FeedResponse {
            items,
            continuation: page.continuation,
        })
    }
}
