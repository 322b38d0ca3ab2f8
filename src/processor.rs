//! Field-level encryption of JSON documents.
//!
//! Each encrypted leaf is stored as a base64 string of
//! `[type marker: 1 byte][AEAD cipher text]`. Objects and arrays under an
//! encrypted path keep their shape and every leaf is encrypted on its own,
//! so nested values stay addressable by path. `null` is never encrypted.
//!
//! Leaf plaintexts: strings as UTF-8, integers as 8-byte little-endian `i64`,
//! other numbers as little-endian `f64`, booleans as one byte. Unsigned
//! integers above `i64::MAX` are rejected.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cosmos_crypto::{AeadAes256CbcHmacSha256, EncryptionType};
use serde_json::{Number, Value};

use crate::error::{EncryptionError, Result, ValueConversionError};
use crate::key_store::ResolvedKey;
use crate::policy::ClientEncryptionIncludedPath;
use crate::store::{Document, PatchOperation};

/// Longest string, in characters, that can be encrypted.
pub const MAX_STRING_LENGTH: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum TypeMarker {
    String = 2,
    Double = 3,
    Long = 4,
    Boolean = 5,
}

impl TypeMarker {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            2 => Some(TypeMarker::String),
            3 => Some(TypeMarker::Double),
            4 => Some(TypeMarker::Long),
            5 => Some(TypeMarker::Boolean),
            _ => None,
        }
    }
}

// ============================================================================
// Leaf conversion
// ============================================================================

fn leaf_to_bytes(value: &Value) -> Result<(TypeMarker, Vec<u8>)> {
    match value {
        Value::String(s) => {
            let length = s.chars().count();
            if length > MAX_STRING_LENGTH {
                return Err(EncryptionError::conversion(ValueConversionError::StringTooLong {
                    length,
                    max: MAX_STRING_LENGTH,
                }));
            }
            Ok((TypeMarker::String, s.as_bytes().to_vec()))
        }
        Value::Bool(b) => Ok((TypeMarker::Boolean, vec![u8::from(*b)])),
        Value::Number(n) => match n.as_i64() {
            Some(long) => Ok((TypeMarker::Long, long.to_le_bytes().to_vec())),
            // Integers above i64::MAX have no lossless envelope.
            None if n.is_u64() => Err(EncryptionError::conversion(
                ValueConversionError::UnsupportedNumber(n.to_string()),
            )),
            None => {
                let double = n.as_f64().ok_or_else(|| {
                    EncryptionError::conversion(ValueConversionError::UnsupportedNumber(n.to_string()))
                })?;
                Ok((TypeMarker::Double, double.to_le_bytes().to_vec()))
            }
        },
        Value::Null => Err(EncryptionError::conversion(ValueConversionError::UnsupportedType("null"))),
        Value::Array(_) => Err(EncryptionError::conversion(ValueConversionError::UnsupportedType("array"))),
        Value::Object(_) => Err(EncryptionError::conversion(ValueConversionError::UnsupportedType("object"))),
    }
}

fn bytes_to_leaf(marker: TypeMarker, bytes: &[u8]) -> std::result::Result<Value, String> {
    match marker {
        TypeMarker::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| e.to_string()),
        TypeMarker::Boolean => match bytes {
            [b] => Ok(Value::Bool(*b != 0)),
            _ => Err(format!("expected 1 byte for a boolean, got {}", bytes.len())),
        },
        TypeMarker::Long => {
            let array: [u8; 8] = bytes
                .try_into()
                .map_err(|_| format!("expected 8 bytes for a long, got {}", bytes.len()))?;
            Ok(Value::from(i64::from_le_bytes(array)))
        }
        TypeMarker::Double => {
            let array: [u8; 8] = bytes
                .try_into()
                .map_err(|_| format!("expected 8 bytes for a double, got {}", bytes.len()))?;
            Number::from_f64(f64::from_le_bytes(array))
                .map(Value::Number)
                .ok_or_else(|| "decrypted double is not finite".to_string())
        }
    }
}

// ============================================================================
// Value encryption
// ============================================================================

/// Encrypt every leaf of `value`, keeping object and array shape.
pub(crate) fn encrypt_value(
    value: &Value,
    cipher: &AeadAes256CbcHmacSha256,
    encryption_type: EncryptionType,
) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), encrypt_value(child, cipher, encryption_type)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| encrypt_value(item, cipher, encryption_type))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        leaf => {
            let (marker, plaintext) = leaf_to_bytes(leaf)?;
            let ciphertext = cipher
                .encrypt(&plaintext, encryption_type)
                .map_err(EncryptionError::conversion)?;
            let mut envelope = Vec::with_capacity(1 + ciphertext.len());
            envelope.push(marker as u8);
            envelope.extend_from_slice(&ciphertext);
            Ok(Value::String(BASE64.encode(envelope)))
        }
    }
}

/// Reverse [`encrypt_value`]. `path` names the property in errors.
pub(crate) fn decrypt_value(value: &Value, cipher: &AeadAes256CbcHmacSha256, path: &str) -> Result<Value> {
    let invalid = |reason: String| EncryptionError::InvalidCiphertext {
        path: path.to_string(),
        reason,
    };
    match value {
        Value::Null => Ok(Value::Null),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), decrypt_value(child, cipher, path)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| decrypt_value(item, cipher, path))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::String(encoded) => {
            let envelope = BASE64
                .decode(encoded)
                .map_err(|e| invalid(format!("not base64: {}", e)))?;
            let (&marker, ciphertext) = envelope
                .split_first()
                .ok_or_else(|| invalid("empty envelope".to_string()))?;
            let marker = TypeMarker::from_byte(marker)
                .ok_or_else(|| invalid(format!("unknown type marker {}", marker)))?;
            let plaintext = cipher.decrypt(ciphertext)?;
            bytes_to_leaf(marker, &plaintext).map_err(invalid)
        }
        Value::Bool(_) | Value::Number(_) => Err(invalid("value is not encrypted".to_string())),
    }
}

// ============================================================================
// EncryptionContext
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct PathEncryption {
    pub included: ClientEncryptionIncludedPath,
    pub key: Arc<ResolvedKey>,
}

impl PathEncryption {
    fn encrypt(&self, value: &Value) -> Result<Value> {
        encrypt_value(value, &self.key.cipher, self.included.encryption_type)
    }

    fn decrypt(&self, value: &Value) -> Result<Value> {
        decrypt_value(value, &self.key.cipher, &self.included.path)
    }
}

/// Resolved policy of one container: top-level property → key and mode.
#[derive(Debug, Clone, Default)]
pub(crate) struct EncryptionContext {
    paths: HashMap<String, PathEncryption>,
}

impl EncryptionContext {
    pub fn new(paths: impl IntoIterator<Item = PathEncryption>) -> Self {
        Self {
            paths: paths
                .into_iter()
                .map(|p| (p.included.property_name().to_string(), p))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn encrypt_document(&self, document: &mut Document) -> Result<()> {
        for (property, path) in &self.paths {
            if let Some(value) = document.get_mut(property) {
                *value = path.encrypt(value)?;
            }
        }
        Ok(())
    }

    pub fn decrypt_document(&self, document: &mut Document) -> Result<()> {
        for (property, path) in &self.paths {
            if let Some(value) = document.get_mut(property) {
                *value = path.decrypt(value)?;
            }
        }
        Ok(())
    }

    /// Encryption of the top-level property that `path` addresses or lies
    /// below. Segments use JSON pointer escaping.
    fn covering(&self, path: &str) -> Option<&PathEncryption> {
        let property = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .replace("~1", "/")
            .replace("~0", "~");
        self.paths.get(&property)
    }

    /// Encrypt the values of patch operations that target an encrypted
    /// property or anything below it.
    pub fn encrypt_patch_operations(&self, operations: &mut [PatchOperation]) -> Result<()> {
        for operation in operations.iter_mut() {
            let Some(path) = self.covering(operation.path()) else {
                continue;
            };
            if let PatchOperation::Increment { path: target, .. } = operation {
                return Err(EncryptionError::Validation(format!(
                    "Increment patch operation is not allowed for encrypted path {}",
                    target
                )));
            }
            if let Some(value) = operation.value_mut() {
                *value = path.encrypt(value)?;
            }
        }
        Ok(())
    }

    /// Encrypt a query parameter bound to `path`, which may name an
    /// encrypted property or a leaf below one. Values bound to paths that are
    /// not encrypted pass through.
    pub fn encrypt_query_parameter(&self, path: &str, value: &Value) -> Result<Value> {
        let Some(encryption) = self.covering(path) else {
            return Ok(value.clone());
        };
        if encryption.included.encryption_type == EncryptionType::Randomized {
            return Err(EncryptionError::RandomizedQueryPath {
                path: path.to_string(),
            });
        }
        encryption.encrypt(value)
    }
}
