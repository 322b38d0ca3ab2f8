//! A complete [`CosmosClient`] held in process memory.
//!
//! State lives behind one `parking_lot::Mutex` and is never held across an
//! await. Every write stamps `_rid`, `_etag`, `_ts` and `_lsn`; the change
//! feed replays the latest version of each item in `_lsn` order.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::patch::apply_patch;
use super::query;
use super::types::*;
use super::CosmosClient;
use crate::key_store::ClientEncryptionKeyProperties;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone)]
struct StoredItem {
    /// Creation order, used as the natural query order.
    sequence: u64,
    lsn: u64,
    document: Document,
}

#[derive(Debug, Clone)]
struct ContainerState {
    properties: ContainerProperties,
    /// (partition key, id) → item
    items: HashMap<(String, String), StoredItem>,
    next_sequence: u64,
    next_lsn: u64,
}

#[derive(Debug, Default)]
struct DatabaseState {
    resource_id: String,
    containers: HashMap<String, ContainerState>,
    client_encryption_keys: HashMap<String, ClientEncryptionKeyProperties>,
}

fn new_resource_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_etag() -> String {
    format!("\"{}\"", Uuid::new_v4())
}

fn document_id(document: &Document) -> CosmosResult<String> {
    match document.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(CosmosError::bad_request(
            "The input content is invalid because the required property 'id' is missing",
        )),
    }
}

fn etag_of(document: &Document) -> Option<String> {
    document
        .get("_etag")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl ContainerState {
    fn new(properties: ContainerProperties) -> Self {
        Self {
            properties,
            items: HashMap::new(),
            next_sequence: 1,
            next_lsn: 1,
        }
    }

    fn key(partition_key: &PartitionKey, id: &str) -> (String, String) {
        (partition_key.key_string(), id.to_string())
    }

    fn check_partition_key(&self, partition_key: &PartitionKey, document: &Document) -> CosmosResult<()> {
        let actual = value_at_path(document, &self.properties.partition_key_path).unwrap_or(&Value::Null);
        if actual != partition_key.value() {
            return Err(CosmosError::bad_request(
                "PartitionKey extracted from document doesn't match the one specified in the header",
            ));
        }
        Ok(())
    }

    fn check_etag(existing: &StoredItem, options: &RequestOptions) -> CosmosResult<()> {
        if let Some(expected) = &options.if_match_etag {
            if etag_of(&existing.document).as_deref() != Some(expected.as_str()) {
                return Err(CosmosError::precondition_failed(
                    "Operation cannot be performed because one of the specified precondition criteria was not met",
                ));
            }
        }
        Ok(())
    }

    /// Stamp system properties and store. Returns the stored copy.
    fn write(&mut self, key: (String, String), mut document: Document, sequence: Option<u64>) -> Document {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        let sequence = sequence.unwrap_or_else(|| {
            let s = self.next_sequence;
            self.next_sequence += 1;
            s
        });
        document.insert("_rid".to_string(), Value::String(new_resource_id()));
        document.insert("_etag".to_string(), Value::String(new_etag()));
        document.insert("_ts".to_string(), Value::from(chrono::Utc::now().timestamp()));
        document.insert("_lsn".to_string(), Value::from(lsn));
        self.items.insert(
            key,
            StoredItem {
                sequence,
                lsn,
                document: document.clone(),
            },
        );
        document
    }

    fn create(&mut self, partition_key: &PartitionKey, document: Document) -> CosmosResult<(u16, Document)> {
        let id = document_id(&document)?;
        self.check_partition_key(partition_key, &document)?;
        let key = Self::key(partition_key, &id);
        if self.items.contains_key(&key) {
            return Err(CosmosError::conflict(id));
        }
        Ok((status::CREATED, self.write(key, document, None)))
    }

    fn upsert(
        &mut self,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<(u16, Document)> {
        let id = document_id(&document)?;
        self.check_partition_key(partition_key, &document)?;
        let key = Self::key(partition_key, &id);
        match self.items.get(&key) {
            Some(existing) => {
                Self::check_etag(existing, options)?;
                let sequence = existing.sequence;
                Ok((status::OK, self.write(key, document, Some(sequence))))
            }
            None => Ok((status::CREATED, self.write(key, document, None))),
        }
    }

    fn replace(
        &mut self,
        id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<(u16, Document)> {
        if document_id(&document)? != id {
            return Err(CosmosError::bad_request("The id in the body does not match the id in the request"));
        }
        self.check_partition_key(partition_key, &document)?;
        let key = Self::key(partition_key, id);
        let existing = self.items.get(&key).ok_or_else(|| CosmosError::not_found(id))?;
        Self::check_etag(existing, options)?;
        let sequence = existing.sequence;
        Ok((status::OK, self.write(key, document, Some(sequence))))
    }

    fn read(&self, id: &str, partition_key: &PartitionKey) -> CosmosResult<Document> {
        self.items
            .get(&Self::key(partition_key, id))
            .map(|item| item.document.clone())
            .ok_or_else(|| CosmosError::not_found(id))
    }

    fn delete(&mut self, id: &str, partition_key: &PartitionKey, options: &RequestOptions) -> CosmosResult<()> {
        let key = Self::key(partition_key, id);
        let existing = self.items.get(&key).ok_or_else(|| CosmosError::not_found(id))?;
        Self::check_etag(existing, options)?;
        self.items.remove(&key);
        Ok(())
    }

    fn patch(
        &mut self,
        id: &str,
        partition_key: &PartitionKey,
        operations: &[PatchOperation],
        options: &RequestOptions,
    ) -> CosmosResult<(u16, Document)> {
        let key = Self::key(partition_key, id);
        let existing = self.items.get(&key).ok_or_else(|| CosmosError::not_found(id))?;
        Self::check_etag(existing, options)?;
        let sequence = existing.sequence;
        let mut document = existing.document.clone();
        apply_patch(&mut document, operations)?;
        self.check_partition_key(partition_key, &document)?;
        Ok((status::OK, self.write(key, document, Some(sequence))))
    }

    fn apply_batch_operation(
        &mut self,
        partition_key: &PartitionKey,
        operation: BatchOperation,
        options: &RequestOptions,
    ) -> CosmosResult<BatchOperationResult> {
        let (status_code, document) = match operation {
            BatchOperation::Create { document } => self.create(partition_key, document)?,
            BatchOperation::Upsert { document } => self.upsert(partition_key, document, options)?,
            BatchOperation::Replace { id, document } => {
                self.replace(&id, partition_key, document, options)?
            }
            BatchOperation::Read { id } => (status::OK, self.read(&id, partition_key)?),
            BatchOperation::Delete { id } => {
                self.delete(&id, partition_key, options)?;
                return Ok(BatchOperationResult {
                    status_code: status::NO_CONTENT,
                    etag: None,
                    document: None,
                });
            }
            BatchOperation::Patch { id, operations } => {
                self.patch(&id, partition_key, &operations, options)?
            }
        };
        Ok(BatchOperationResult {
            status_code,
            etag: etag_of(&document),
            document: Some(document),
        })
    }
}

fn encode_token(position: u64) -> String {
    BASE64.encode(position.to_string())
}

fn decode_token(token: &str) -> CosmosResult<u64> {
    BASE64
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| CosmosError::bad_request("Invalid continuation token"))
}

// ============================================================================
// InMemoryCosmosClient
// ============================================================================

/// In-memory database account.
#[derive(Default)]
pub struct InMemoryCosmosClient {
    databases: Mutex<HashMap<String, DatabaseState>>,
}

impl InMemoryCosmosClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored document, bypassing any encryption layer.
    pub fn raw_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
    ) -> Option<Document> {
        let databases = self.databases.lock();
        databases
            .get(database_id)?
            .containers
            .get(container_id)?
            .read(id, partition_key)
            .ok()
    }

    fn with_container<T>(
        &self,
        database_id: &str,
        container_id: &str,
        f: impl FnOnce(&mut ContainerState) -> CosmosResult<T>,
    ) -> CosmosResult<T> {
        let mut databases = self.databases.lock();
        let database = databases
            .get_mut(database_id)
            .ok_or_else(|| CosmosError::not_found(database_id))?;
        let container = database
            .containers
            .get_mut(container_id)
            .ok_or_else(|| CosmosError::not_found(format!("{}/{}", database_id, container_id)))?;
        f(container)
    }

    fn with_database<T>(
        &self,
        database_id: &str,
        f: impl FnOnce(&mut DatabaseState) -> CosmosResult<T>,
    ) -> CosmosResult<T> {
        let mut databases = self.databases.lock();
        let database = databases
            .get_mut(database_id)
            .ok_or_else(|| CosmosError::not_found(database_id))?;
        f(database)
    }
}

fn write_response(status_code: u16, document: Document, options: &RequestOptions) -> DocumentResponse {
    DocumentResponse {
        status_code,
        etag: etag_of(&document),
        document: options.content_response_on_write.then_some(document),
    }
}

#[async_trait]
impl CosmosClient for InMemoryCosmosClient {
    async fn create_database(&self, database_id: &str) -> CosmosResult<DatabaseProperties> {
        let mut databases = self.databases.lock();
        if databases.contains_key(database_id) {
            return Err(CosmosError::conflict(database_id));
        }
        let resource_id = new_resource_id();
        databases.insert(
            database_id.to_string(),
            DatabaseState {
                resource_id: resource_id.clone(),
                ..DatabaseState::default()
            },
        );
        debug!(database_id, "created database");
        Ok(DatabaseProperties {
            id: database_id.to_string(),
            resource_id,
        })
    }

    async fn delete_database(&self, database_id: &str) -> CosmosResult<()> {
        self.databases
            .lock()
            .remove(database_id)
            .map(|_| ())
            .ok_or_else(|| CosmosError::not_found(database_id))
    }

    async fn create_container(
        &self,
        database_id: &str,
        mut properties: ContainerProperties,
    ) -> CosmosResult<ContainerProperties> {
        self.with_database(database_id, |database| {
            if database.containers.contains_key(&properties.id) {
                return Err(CosmosError::conflict(&properties.id));
            }
            if !properties.partition_key_path.starts_with('/') {
                return Err(CosmosError::bad_request("Partition key path must start with /"));
            }
            properties.resource_id = format!("{}.{}", database.resource_id, new_resource_id());
            database
                .containers
                .insert(properties.id.clone(), ContainerState::new(properties.clone()));
            Ok(properties)
        })
    }

    async fn read_container(
        &self,
        database_id: &str,
        container_id: &str,
    ) -> CosmosResult<ContainerProperties> {
        self.with_container(database_id, container_id, |container| {
            Ok(container.properties.clone())
        })
    }

    async fn delete_container(&self, database_id: &str, container_id: &str) -> CosmosResult<()> {
        self.with_database(database_id, |database| {
            database
                .containers
                .remove(container_id)
                .map(|_| ())
                .ok_or_else(|| CosmosError::not_found(container_id))
        })
    }

    async fn create_client_encryption_key(
        &self,
        database_id: &str,
        mut properties: ClientEncryptionKeyProperties,
    ) -> CosmosResult<ClientEncryptionKeyProperties> {
        self.with_database(database_id, |database| {
            if database.client_encryption_keys.contains_key(&properties.id) {
                return Err(CosmosError::conflict(&properties.id));
            }
            properties.etag = Some(new_etag());
            database
                .client_encryption_keys
                .insert(properties.id.clone(), properties.clone());
            Ok(properties)
        })
    }

    async fn read_client_encryption_key(
        &self,
        database_id: &str,
        key_id: &str,
    ) -> CosmosResult<ClientEncryptionKeyProperties> {
        self.with_database(database_id, |database| {
            database
                .client_encryption_keys
                .get(key_id)
                .cloned()
                .ok_or_else(|| CosmosError::not_found(key_id))
        })
    }

    async fn replace_client_encryption_key(
        &self,
        database_id: &str,
        mut properties: ClientEncryptionKeyProperties,
    ) -> CosmosResult<ClientEncryptionKeyProperties> {
        self.with_database(database_id, |database| {
            let existing = database
                .client_encryption_keys
                .get_mut(&properties.id)
                .ok_or_else(|| CosmosError::not_found(&properties.id))?;
            if properties.etag.is_some() && properties.etag != existing.etag {
                return Err(CosmosError::precondition_failed(
                    "Client encryption key was modified concurrently",
                ));
            }
            properties.etag = Some(new_etag());
            *existing = properties.clone();
            Ok(properties)
        })
    }

    async fn create_item(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        let (status_code, stored) = self.with_container(database_id, container_id, |c| {
            c.create(partition_key, document)
        })?;
        Ok(write_response(status_code, stored, options))
    }

    async fn upsert_item(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        let (status_code, stored) = self.with_container(database_id, container_id, |c| {
            c.upsert(partition_key, document, options)
        })?;
        Ok(write_response(status_code, stored, options))
    }

    async fn replace_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        document: Document,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        let (status_code, stored) = self.with_container(database_id, container_id, |c| {
            c.replace(id, partition_key, document, options)
        })?;
        Ok(write_response(status_code, stored, options))
    }

    async fn read_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        _options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        let document = self.with_container(database_id, container_id, |c| c.read(id, partition_key))?;
        Ok(DocumentResponse {
            status_code: status::OK,
            etag: etag_of(&document),
            document: Some(document),
        })
    }

    async fn delete_item(
        &self,
        database_id: &str,
        container_id: &str,
        id: &str,
        partition_key: &PartitionKey,
        options: &RequestOptions,
    ) -> CosmosResult<DocumentResponse> {
        self.with_container(database_id, container_id, |c| {
            c.delete(id, partition_key, options)
        })?;
        Ok(DocumentResponse {
            status_code: status::NO_CONTENT,
            etag: None,
            document: None,
        })
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
        let (status_code, stored) = self.with_container(database_id, container_id, |c| {
            c.patch(id, partition_key, &operations, options)
        })?;
        Ok(write_response(status_code, stored, options))
    }

    async fn execute_batch(
        &self,
        database_id: &str,
        container_id: &str,
        partition_key: &PartitionKey,
        operations: Vec<BatchOperation>,
        options: &RequestOptions,
    ) -> CosmosResult<BatchResponse> {
        if operations.is_empty() {
            return Err(CosmosError::bad_request("Batch request has no operations"));
        }
        self.with_container(database_id, container_id, |container| {
            // Run against a copy; commit only if every operation succeeds.
            let mut staged = container.clone();
            let count = operations.len();
            let mut results = Vec::with_capacity(count);
            for (index, operation) in operations.into_iter().enumerate() {
                match staged.apply_batch_operation(partition_key, operation, options) {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        debug!(index, status = err.status_code, "batch operation failed");
                        let results = (0..count)
                            .map(|i| BatchOperationResult {
                                status_code: if i == index {
                                    err.status_code
                                } else {
                                    status::FAILED_DEPENDENCY
                                },
                                etag: None,
                                document: None,
                            })
                            .collect();
                        return Ok(BatchResponse {
                            status_code: err.status_code,
                            results,
                        });
                    }
                }
            }
            *container = staged;
            Ok(BatchResponse {
                status_code: status::OK,
                results,
            })
        })
    }

    async fn query_items(
        &self,
        database_id: &str,
        container_id: &str,
        query_spec: &QuerySpec,
        options: &FeedOptions,
    ) -> CosmosResult<FeedPage> {
        let parsed = query::parse(&query_spec.query_text)?;
        let offset = match &options.continuation {
            Some(token) => decode_token(token)? as usize,
            None => 0,
        };
        self.with_container(database_id, container_id, |container| {
            let mut items: Vec<&StoredItem> = container
                .items
                .iter()
                .filter(|((pk, _), _)| {
                    options
                        .partition_key
                        .as_ref()
                        .map_or(true, |wanted| &wanted.key_string() == pk)
                })
                .map(|(_, item)| item)
                .collect();
            items.sort_by_key(|item| item.sequence);

            let mut matched = Vec::new();
            for item in items {
                if parsed.matches(&item.document, &query_spec.parameters)? {
                    matched.push(item.document.clone());
                }
            }
            parsed.sort(&mut matched);

            let page_size = options.max_item_count.unwrap_or(usize::MAX).max(1);
            let end = offset.saturating_add(page_size).min(matched.len());
            let documents = matched
                .get(offset.min(end)..end)
                .map(<[Document]>::to_vec)
                .unwrap_or_default();
            let continuation = (end < matched.len()).then(|| encode_token(end as u64));
            Ok(FeedPage {
                documents,
                continuation,
            })
        })
    }

    async fn read_change_feed(
        &self,
        database_id: &str,
        container_id: &str,
        options: &FeedOptions,
    ) -> CosmosResult<FeedPage> {
        let after = match &options.continuation {
            Some(token) => decode_token(token)?,
            None => 0,
        };
        self.with_container(database_id, container_id, |container| {
            let mut changed: Vec<&StoredItem> = container
                .items
                .iter()
                .filter(|((pk, _), item)| {
                    item.lsn > after
                        && options
                            .partition_key
                            .as_ref()
                            .map_or(true, |wanted| &wanted.key_string() == pk)
                })
                .map(|(_, item)| item)
                .collect();
            changed.sort_by_key(|item| item.lsn);
            if let Some(limit) = options.max_item_count {
                changed.truncate(limit.max(1));
            }
            let last = changed.last().map_or(after, |item| item.lsn);
            Ok(FeedPage {
                documents: changed.into_iter().map(|item| item.document.clone()).collect(),
                continuation: Some(encode_token(last)),
            })
        })
    }
}
