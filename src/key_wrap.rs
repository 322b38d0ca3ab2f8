//! Key wrap providers: the key encryption key (KEK) side of envelope
//! encryption.
//!
//! A client encryption key's root key is only ever persisted wrapped under a
//! KEK. The encryption client is configured with exactly one provider and the
//! resolver name every key's wrap metadata must carry.

use std::collections::HashMap;

use async_trait::async_trait;
use cosmos_crypto::{
    generate_root_key, generate_signing_key, key_metadata_message, sign, unwrap_key, verify,
    wrap_key, SigningKey, A256KW,
};
use parking_lot::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::KeyWrapError;

/// Resolver name conventionally used with [`AesKeyWrapProvider`].
pub const AES_KEY_WRAP_RESOLVER_NAME: &str = "AES_KEY_WRAP";

// ============================================================================
// KeyWrapProvider: user-provided KEK access
// ============================================================================

/// Wrap, unwrap, sign and verify with a named key encryption key.
///
/// `key_id` is the wrap metadata `value` and `algorithm` is the wrap metadata
/// `algorithm`. Implementations typically call out to a KMS or HSM; every
/// failure is reported as [`KeyWrapError`] and is not retried.
#[async_trait]
pub trait KeyWrapProvider: Send + Sync {
    async fn wrap_key(
        &self,
        key_id: &str,
        algorithm: &str,
        key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError>;

    async fn unwrap_key(
        &self,
        key_id: &str,
        algorithm: &str,
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError>;

    /// Sign the KEK's metadata.
    async fn sign(
        &self,
        key_id: &str,
        allow_enclave_computations: bool,
    ) -> Result<Vec<u8>, KeyWrapError>;

    /// Verify a signature produced by [`sign`](Self::sign).
    async fn verify(
        &self,
        key_id: &str,
        allow_enclave_computations: bool,
        signature: &[u8],
    ) -> Result<bool, KeyWrapError>;
}

// ============================================================================
// AesKeyWrapProvider
// ============================================================================

struct KeyEncryptionKey {
    kek: Zeroizing<[u8; 32]>,
    signing_key: SigningKey,
}

/// Provider holding 256-bit KEKs in memory. Wraps with AES key wrap
/// (RFC 3394, algorithm `A256KW`) and signs with a per-KEK P-256 key.
#[derive(Default)]
pub struct AesKeyWrapProvider {
    keys: RwLock<HashMap<String, KeyEncryptionKey>>,
}

impl AesKeyWrapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a KEK under `key_id`, replacing any existing one.
    pub fn add_key(&self, key_id: impl Into<String>, kek: [u8; 32]) -> Result<(), KeyWrapError> {
        let signing_key = generate_signing_key()?;
        self.keys.write().insert(
            key_id.into(),
            KeyEncryptionKey {
                kek: Zeroizing::new(kek),
                signing_key,
            },
        );
        Ok(())
    }

    /// Register a freshly generated KEK under `key_id`.
    pub fn generate_key(&self, key_id: impl Into<String>) -> Result<(), KeyWrapError> {
        let kek = generate_root_key()?;
        self.add_key(key_id, kek)
    }

    fn check_algorithm(algorithm: &str) -> Result<(), KeyWrapError> {
        if algorithm == A256KW {
            Ok(())
        } else {
            Err(KeyWrapError::new(format!(
                "Unsupported key wrap algorithm '{}', expected '{}'",
                algorithm, A256KW
            )))
        }
    }

    fn with_key<T>(
        &self,
        key_id: &str,
        f: impl FnOnce(&KeyEncryptionKey) -> Result<T, KeyWrapError>,
    ) -> Result<T, KeyWrapError> {
        let keys = self.keys.read();
        let entry = keys
            .get(key_id)
            .ok_or_else(|| KeyWrapError::new(format!("Key encryption key '{}' not found", key_id)))?;
        f(entry)
    }
}

#[async_trait]
impl KeyWrapProvider for AesKeyWrapProvider {
    async fn wrap_key(
        &self,
        key_id: &str,
        algorithm: &str,
        key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError> {
        Self::check_algorithm(algorithm)?;
        debug!(key_id, "wrapping key");
        self.with_key(key_id, |entry| Ok(wrap_key(key, &entry.kek[..])?))
    }

    async fn unwrap_key(
        &self,
        key_id: &str,
        algorithm: &str,
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>, KeyWrapError> {
        Self::check_algorithm(algorithm)?;
        debug!(key_id, "unwrapping key");
        self.with_key(key_id, |entry| Ok(unwrap_key(wrapped_key, &entry.kek[..])?))
    }

    async fn sign(
        &self,
        key_id: &str,
        allow_enclave_computations: bool,
    ) -> Result<Vec<u8>, KeyWrapError> {
        let message = key_metadata_message(key_id, allow_enclave_computations);
        self.with_key(key_id, |entry| Ok(sign(&entry.signing_key, &message)?))
    }

    async fn verify(
        &self,
        key_id: &str,
        allow_enclave_computations: bool,
        signature: &[u8],
    ) -> Result<bool, KeyWrapError> {
        let message = key_metadata_message(key_id, allow_enclave_computations);
        self.with_key(key_id, |entry| {
            Ok(verify(entry.signing_key.verifying_key(), &message, signature))
        })
    }
}
