//! Transactional batch and bulk operation types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{EncryptionError, Result};
use crate::store::{PartitionKey, PatchOperation};

// ============================================================================
// TransactionalBatch
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum PendingOperation {
    Create(Value),
    Upsert(Value),
    Replace { id: String, item: Value },
    Read { id: String },
    Delete { id: String },
    Patch { id: String, operations: Vec<PatchOperation> },
}

/// Operations executed atomically against one logical partition.
///
/// Each operation is encrypted on its own when the batch executes. Results
/// come back in the order the operations were added.
#[derive(Debug, Clone)]
pub struct TransactionalBatch {
    pub(crate) partition_key: PartitionKey,
    pub(crate) operations: Vec<PendingOperation>,
}

impl TransactionalBatch {
    pub fn new(partition_key: impl Into<PartitionKey>) -> Self {
        Self {
            partition_key: partition_key.into(),
            operations: Vec::new(),
        }
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn create_item<T: Serialize>(&mut self, item: &T) -> Result<&mut Self> {
        self.operations
            .push(PendingOperation::Create(serde_json::to_value(item)?));
        Ok(self)
    }

    pub fn upsert_item<T: Serialize>(&mut self, item: &T) -> Result<&mut Self> {
        self.operations
            .push(PendingOperation::Upsert(serde_json::to_value(item)?));
        Ok(self)
    }

    pub fn replace_item<T: Serialize>(&mut self, id: impl Into<String>, item: &T) -> Result<&mut Self> {
        self.operations.push(PendingOperation::Replace {
            id: id.into(),
            item: serde_json::to_value(item)?,
        });
        Ok(self)
    }

    pub fn read_item(&mut self, id: impl Into<String>) -> &mut Self {
        self.operations.push(PendingOperation::Read { id: id.into() });
        self
    }

    pub fn delete_item(&mut self, id: impl Into<String>) -> &mut Self {
        self.operations.push(PendingOperation::Delete { id: id.into() });
        self
    }

    pub fn patch_item(&mut self, id: impl Into<String>, operations: Vec<PatchOperation>) -> &mut Self {
        self.operations.push(PendingOperation::Patch {
            id: id.into(),
            operations,
        });
        self
    }
}

/// Outcome of one batch operation. `item` is the decrypted document.
///
/// The batch has already been committed when results are decrypted, so a
/// document that fails to decrypt is reported in `error` with `item` left
/// empty, and its siblings are unaffected.
#[derive(Debug)]
pub struct TransactionalBatchOperationResult {
    pub status_code: u16,
    pub etag: Option<String>,
    pub item: Option<Value>,
    pub error: Option<EncryptionError>,
}

impl TransactionalBatchOperationResult {
    pub fn is_success(&self) -> bool {
        crate::store::is_success(self.status_code)
    }

    pub fn item_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.item
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(EncryptionError::from)
    }
}

#[derive(Debug)]
pub struct TransactionalBatchResponse {
    pub status_code: u16,
    pub results: Vec<TransactionalBatchOperationResult>,
}

impl TransactionalBatchResponse {
    pub fn is_success(&self) -> bool {
        crate::store::is_success(self.status_code)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TransactionalBatchOperationResult> {
        self.results.get(index)
    }
}

// ============================================================================
// Bulk
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum BulkOperationKind {
    Create(Value),
    Upsert(Value),
    Replace { id: String, item: Value },
    Read { id: String },
    Delete { id: String },
}

/// One independent operation of a bulk execution.
#[derive(Debug, Clone)]
pub struct BulkOperation {
    pub(crate) partition_key: PartitionKey,
    pub(crate) kind: BulkOperationKind,
}

impl BulkOperation {
    pub fn create<T: Serialize>(partition_key: impl Into<PartitionKey>, item: &T) -> Result<Self> {
        Ok(Self {
            partition_key: partition_key.into(),
            kind: BulkOperationKind::Create(serde_json::to_value(item)?),
        })
    }

    pub fn upsert<T: Serialize>(partition_key: impl Into<PartitionKey>, item: &T) -> Result<Self> {
        Ok(Self {
            partition_key: partition_key.into(),
            kind: BulkOperationKind::Upsert(serde_json::to_value(item)?),
        })
    }

    pub fn replace<T: Serialize>(
        partition_key: impl Into<PartitionKey>,
        id: impl Into<String>,
        item: &T,
    ) -> Result<Self> {
        Ok(Self {
            partition_key: partition_key.into(),
            kind: BulkOperationKind::Replace {
                id: id.into(),
                item: serde_json::to_value(item)?,
            },
        })
    }

    pub fn read(partition_key: impl Into<PartitionKey>, id: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            kind: BulkOperationKind::Read { id: id.into() },
        }
    }

    pub fn delete(partition_key: impl Into<PartitionKey>, id: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            kind: BulkOperationKind::Delete { id: id.into() },
        }
    }
}

/// Result of one bulk operation. `index` is its position in the input.
#[derive(Debug)]
pub struct BulkOperationResult {
    pub index: usize,
    pub result: Result<crate::container::ItemResponse<Value>>,
}
