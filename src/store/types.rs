//! Resource, request, and response types exchanged with the underlying
//! document database client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::policy::ClientEncryptionPolicy;

/// A JSON document as stored by the database.
pub type Document = Map<String, Value>;

// ============================================================================
// Status codes
// ============================================================================

pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const NOT_MODIFIED: u16 = 304;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const FAILED_DEPENDENCY: u16 = 424;
}

/// Is this a 2xx status?
pub fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

// ============================================================================
// CosmosError
// ============================================================================

/// Status error returned by the database client. Passed through the
/// encryption layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status code {status_code})")]
pub struct CosmosError {
    pub status_code: u16,
    pub message: String,
}

impl CosmosError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(status::BAD_REQUEST, message)
    }

    pub fn not_found(resource: impl std::fmt::Display) -> Self {
        Self::new(status::NOT_FOUND, format!("Resource Not Found: {}", resource))
    }

    pub fn conflict(resource: impl std::fmt::Display) -> Self {
        Self::new(
            status::CONFLICT,
            format!("Resource with specified id already exists: {}", resource),
        )
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(status::PRECONDITION_FAILED, message)
    }
}

pub type CosmosResult<T> = std::result::Result<T, CosmosError>;

// ============================================================================
// Partition keys
// ============================================================================

/// Partition key value of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionKey(pub Value);

impl PartitionKey {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Canonical string form used as a storage key.
    pub fn key_string(&self) -> String {
        self.0.to_string()
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<i64> for PartitionKey {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

/// Look up the value at a `/a/b` style path inside a document.
pub fn value_at_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.trim_start_matches('/').split('/');
    let first = segments.next()?;
    let mut current = document.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseProperties {
    pub id: String,
    #[serde(rename = "_rid", default)]
    pub resource_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub id: String,
    pub partition_key_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_encryption_policy: Option<ClientEncryptionPolicy>,
    /// Assigned by the store; a recreated container gets a new value.
    #[serde(rename = "_rid", default)]
    pub resource_id: String,
}

impl ContainerProperties {
    pub fn new(id: impl Into<String>, partition_key_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key_path: partition_key_path.into(),
            client_encryption_policy: None,
            resource_id: String::new(),
        }
    }

    pub fn with_client_encryption_policy(mut self, policy: ClientEncryptionPolicy) -> Self {
        self.client_encryption_policy = Some(policy);
        self
    }
}

// ============================================================================
// Request options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    ConsistentPrefix,
    Eventual,
}

/// Options forwarded verbatim to the database client.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Return the written item in write responses (default: true).
    pub content_response_on_write: bool,
    /// Optimistic concurrency: fail with 412 unless the stored etag matches.
    pub if_match_etag: Option<String>,
    pub consistency_level: Option<ConsistencyLevel>,
    pub session_token: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            content_response_on_write: true,
            if_match_etag: None,
            consistency_level: None,
            session_token: None,
        }
    }
}

/// Paging options for query and change feed reads.
#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Page size (`None` = everything in one page).
    pub max_item_count: Option<usize>,
    /// Opaque token returned by the previous page.
    pub continuation: Option<String>,
    /// Restrict the read to one logical partition.
    pub partition_key: Option<PartitionKey>,
    pub consistency_level: Option<ConsistencyLevel>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone)]
pub struct DocumentResponse {
    pub status_code: u16,
    pub etag: Option<String>,
    /// `None` for deletes and for writes with content response disabled.
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub documents: Vec<Document>,
    /// `None` once a query is exhausted. Change feed always returns a token.
    pub continuation: Option<String>,
}

// ============================================================================
// Patch
// ============================================================================

/// A single JSON-pointer patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Set { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
    Increment { path: String, value: Value },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Set { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Increment { path, .. } => path,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOperation::Add { value, .. }
            | PatchOperation::Set { value, .. }
            | PatchOperation::Replace { value, .. }
            | PatchOperation::Increment { value, .. } => Some(value),
            PatchOperation::Remove { .. } => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        match self {
            PatchOperation::Add { value, .. }
            | PatchOperation::Set { value, .. }
            | PatchOperation::Replace { value, .. }
            | PatchOperation::Increment { value, .. } => Some(value),
            PatchOperation::Remove { .. } => None,
        }
    }
}

// ============================================================================
// Batch
// ============================================================================

/// One operation of a transactional batch. All operations share the batch's
/// partition key.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Create { document: Document },
    Upsert { document: Document },
    Replace { id: String, document: Document },
    Read { id: String },
    Delete { id: String },
    Patch { id: String, operations: Vec<PatchOperation> },
}

#[derive(Debug, Clone)]
pub struct BatchOperationResult {
    pub status_code: u16,
    pub etag: Option<String>,
    pub document: Option<Document>,
}

#[derive(Debug, Clone)]
pub struct BatchResponse {
    /// 200 when every operation succeeded, otherwise the failing operation's status.
    pub status_code: u16,
    /// One result per submitted operation, in submission order.
    pub results: Vec<BatchOperationResult>,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        is_success(self.status_code)
    }
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    pub query_text: String,
    pub parameters: Vec<SqlParameter>,
}

impl QuerySpec {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}
