//! Mapping between application values and wire documents.
//!
//! Encryption runs on the document the serializer produces, so a custom
//! serializer changes which JSON tree is stored but never which paths are
//! encrypted.

use serde_json::Value;

use crate::error::{EncryptionError, Result};
use crate::store::Document;

pub trait ItemSerializer: Send + Sync {
    /// Convert a serde-produced value into the document sent to the store.
    fn to_document(&self, value: Value) -> Result<Document>;

    /// Convert a decrypted document back into a value for serde.
    fn from_document(&self, document: Document) -> Result<Value>;
}

/// Items must serialize to JSON objects; documents are returned as-is,
/// system properties included.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultItemSerializer;

impl ItemSerializer for DefaultItemSerializer {
    fn to_document(&self, value: Value) -> Result<Document> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(EncryptionError::Validation(format!(
                "Item must serialize to a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    fn from_document(&self, document: Document) -> Result<Value> {
        Ok(Value::Object(document))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
