//! Client encryption keys: the persisted, wrapped data encryption keys of a
//! database, and the create, rewrap and read operations on them.

use std::sync::Arc;

use cosmos_crypto::{generate_root_key, AeadAes256CbcHmacSha256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::client::{ClientInner, EncryptionDatabase};
use crate::error::{EncryptionError, Result, RESOLVER_NAME_MISMATCH_MESSAGE};
use crate::policy::check_algorithm;

// ============================================================================
// Resource types
// ============================================================================

/// Identifies the key encryption key a client encryption key is wrapped with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKeyWrapMetadata {
    /// Resolver name; must equal the name configured on the client.
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    /// KEK identifier handed to the key wrap provider.
    pub value: String,
    /// Key wrap algorithm handed to the key wrap provider.
    pub algorithm: String,
}

impl EncryptionKeyWrapMetadata {
    pub fn new(
        type_: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            name: name.into(),
            value: value.into(),
            algorithm: algorithm.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEncryptionKeyProperties {
    pub id: String,
    pub encryption_algorithm: String,
    #[serde(with = "base64_bytes")]
    pub wrapped_data_encryption_key: Vec<u8>,
    pub encryption_key_wrap_metadata: EncryptionKeyWrapMetadata,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A client encryption key with its unwrapped cipher, as held by the key cache.
#[derive(Debug)]
pub struct ResolvedKey {
    pub properties: ClientEncryptionKeyProperties,
    pub(crate) cipher: AeadAes256CbcHmacSha256,
}

// ============================================================================
// Validation
// ============================================================================

/// Metadata must name the configured resolver and carry a KEK identifier.
pub(crate) fn check_wrap_metadata(
    metadata: &EncryptionKeyWrapMetadata,
    resolver_name: &str,
) -> Result<()> {
    if metadata.type_ != resolver_name {
        return Err(EncryptionError::Configuration(
            RESOLVER_NAME_MISMATCH_MESSAGE.to_string(),
        ));
    }
    if metadata.value.trim().is_empty() {
        return Err(EncryptionError::Validation(
            "EncryptionKeyWrapMetadata value cannot be empty".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Resolution (key cache fetch)
// ============================================================================

/// Read a key through the key cache, unwrapping it on a miss.
pub(crate) async fn resolve_key(
    inner: &ClientInner,
    database_id: &str,
    key_id: &str,
) -> Result<Arc<ResolvedKey>> {
    let cache_key = format!("{}/{}", database_id, key_id);
    inner
        .cache
        .keys()
        .get_or_try_init(&cache_key, || fetch_key(inner, database_id, key_id))
        .await
}

async fn fetch_key(inner: &ClientInner, database_id: &str, key_id: &str) -> Result<Arc<ResolvedKey>> {
    let properties = inner
        .cosmos
        .read_client_encryption_key(database_id, key_id)
        .await?;
    check_algorithm(&properties.encryption_algorithm)?;
    let metadata = &properties.encryption_key_wrap_metadata;
    check_wrap_metadata(metadata, &inner.resolver_name)?;

    let root_key = Zeroizing::new(
        inner
            .provider
            .unwrap_key(
                &metadata.value,
                &metadata.algorithm,
                &properties.wrapped_data_encryption_key,
            )
            .await
            .map_err(EncryptionError::KeyWrap)?,
    );
    let cipher = AeadAes256CbcHmacSha256::new(&root_key)?;
    debug!(database_id, key_id, "resolved client encryption key");
    Ok(Arc::new(ResolvedKey { properties, cipher }))
}

// ============================================================================
// Key store operations
// ============================================================================

impl EncryptionDatabase {
    /// Create a client encryption key with a fresh random root key wrapped
    /// under the KEK named by `wrap_metadata`.
    ///
    /// # Arguments
    /// * `key_id` - id of the new key, unique within the database
    /// * `algorithm` - data encryption algorithm (`AEAD_AES_256_CBC_HMAC_SHA256`)
    /// * `wrap_metadata` - KEK to wrap under; its type must be the client's resolver name
    pub async fn create_client_encryption_key(
        &self,
        key_id: &str,
        algorithm: &str,
        wrap_metadata: EncryptionKeyWrapMetadata,
    ) -> Result<ClientEncryptionKeyProperties> {
        check_algorithm(algorithm)?;
        check_wrap_metadata(&wrap_metadata, &self.inner.resolver_name)?;
        if key_id.trim().is_empty() {
            return Err(EncryptionError::Validation(
                "Client encryption key id cannot be empty".to_string(),
            ));
        }

        let root_key = Zeroizing::new(generate_root_key()?);
        let wrapped = self
            .inner
            .provider
            .wrap_key(&wrap_metadata.value, &wrap_metadata.algorithm, &root_key[..])
            .await
            .map_err(EncryptionError::KeyWrap)?;

        let properties = ClientEncryptionKeyProperties {
            id: key_id.to_string(),
            encryption_algorithm: algorithm.to_string(),
            wrapped_data_encryption_key: wrapped,
            encryption_key_wrap_metadata: wrap_metadata,
            etag: None,
        };
        let created = self
            .inner
            .cosmos
            .create_client_encryption_key(&self.id, properties)
            .await?;
        info!(database_id = %self.id, key_id, "created client encryption key");
        Ok(created)
    }

    /// Re-wrap a client encryption key under a new KEK. The root key, and
    /// therefore every encrypted value, is unchanged.
    pub async fn rewrap_client_encryption_key(
        &self,
        key_id: &str,
        new_wrap_metadata: EncryptionKeyWrapMetadata,
    ) -> Result<ClientEncryptionKeyProperties> {
        check_wrap_metadata(&new_wrap_metadata, &self.inner.resolver_name)?;

        let mut properties = self
            .inner
            .cosmos
            .read_client_encryption_key(&self.id, key_id)
            .await?;
        check_algorithm(&properties.encryption_algorithm)?;
        let old = &properties.encryption_key_wrap_metadata;
        check_wrap_metadata(old, &self.inner.resolver_name)?;

        let root_key = Zeroizing::new(
            self.inner
                .provider
                .unwrap_key(&old.value, &old.algorithm, &properties.wrapped_data_encryption_key)
                .await
                .map_err(EncryptionError::KeyWrap)?,
        );
        let rewrapped = self
            .inner
            .provider
            .wrap_key(&new_wrap_metadata.value, &new_wrap_metadata.algorithm, &root_key)
            .await
            .map_err(EncryptionError::KeyWrap)?;

        properties.wrapped_data_encryption_key = rewrapped;
        properties.encryption_key_wrap_metadata = new_wrap_metadata;
        let replaced = self
            .inner
            .cosmos
            .replace_client_encryption_key(&self.id, properties)
            .await?;
        self.inner
            .cache
            .invalidate_client_encryption_key(&self.id, key_id);
        info!(database_id = %self.id, key_id, "rewrapped client encryption key");
        Ok(replaced)
    }

    /// Read a client encryption key's properties through the key cache.
    pub async fn read_client_encryption_key(
        &self,
        key_id: &str,
    ) -> Result<ClientEncryptionKeyProperties> {
        let resolved = resolve_key(&self.inner, &self.id, key_id).await?;
        Ok(resolved.properties.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn metadata(type_: &str, value: &str) -> EncryptionKeyWrapMetadata {
        EncryptionKeyWrapMetadata::new(type_, "key1", value, "A256KW")
    }

    #[test]
    fn mismatched_resolver_name_is_configuration_error() {
        let err = check_wrap_metadata(&metadata("OTHER", "kek1"), "AES_KEY_WRAP").unwrap_err();
        assert_eq!(err.to_string(), RESOLVER_NAME_MISMATCH_MESSAGE);
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn empty_type_is_a_mismatch() {
        let err = check_wrap_metadata(&metadata("", "kek1"), "AES_KEY_WRAP").unwrap_err();
        assert_eq!(err.to_string(), RESOLVER_NAME_MISMATCH_MESSAGE);
    }

    #[test]
    fn empty_value_is_validation_error() {
        let err = check_wrap_metadata(&metadata("AES_KEY_WRAP", " "), "AES_KEY_WRAP").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn properties_serialize_wrapped_key_as_base64() {
        let props = ClientEncryptionKeyProperties {
            id: "key1".to_string(),
            encryption_algorithm: "AEAD_AES_256_CBC_HMAC_SHA256".to_string(),
            wrapped_data_encryption_key: vec![1, 2, 3],
            encryption_key_wrap_metadata: metadata("AES_KEY_WRAP", "kek1"),
            etag: None,
        };
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["wrappedDataEncryptionKey"], "AQID");
        assert_eq!(json["encryptionKeyWrapMetadata"]["type"], "AES_KEY_WRAP");
        assert!(json.get("_etag").is_none());
        let back: ClientEncryptionKeyProperties = serde_json::from_value(json).unwrap();
        assert_eq!(back, props);
    }
}
