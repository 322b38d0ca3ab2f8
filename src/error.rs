use std::time::Duration;

use cosmos_crypto::CryptoError;
use thiserror::Error;

use crate::store::CosmosError;

pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Message returned when a container's policy is newer than this library understands.
pub const UNSUPPORTED_POLICY_VERSION_MESSAGE: &str = "This version of the Encryption library cannot be used with this container. Please upgrade to the latest version of the same.";

/// Message returned when wrap metadata names a different resolver than the client's.
pub const RESOLVER_NAME_MISMATCH_MESSAGE: &str = "The EncryptionKeyWrapMetadata Type value does not match with the keyEncryptionKeyResolverName configured on the Client. Please refer to https://aka.ms/CosmosClientEncryption for more details.";

/// Broad classification used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfigured client or key wrap provider. Not retriable.
    Configuration,
    /// Request rejected before any network call. Not retriable.
    Validation,
    /// Value could not be converted, encrypted, or decrypted.
    Data,
    /// Query parameter bound to a path that cannot be queried.
    Query,
    /// Caller-supplied timeout elapsed.
    Timeout,
    /// Status error from the underlying database client.
    Service,
}

/// Failure reported by a [`KeyWrapProvider`](crate::KeyWrapProvider).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct KeyWrapError {
    pub message: String,
}

impl KeyWrapError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CryptoError> for KeyWrapError {
    fn from(err: CryptoError) -> Self {
        Self::new(err.to_string())
    }
}

/// Cause attached to [`EncryptionError::Conversion`].
#[derive(Debug, Error)]
pub enum ValueConversionError {
    #[error("String of length {length} exceeds the maximum encryptable length of {max} characters")]
    StringTooLong { length: usize, max: usize },

    #[error("Number {0} cannot be represented as a long or a double")]
    UnsupportedNumber(String),

    #[error("A {0} value cannot be encrypted as a single field")]
    UnsupportedType(&'static str),

    #[error("Encryption failed: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("{}", UNSUPPORTED_POLICY_VERSION_MESSAGE)]
    UnsupportedPolicyVersion { version: u32 },

    #[error("Path {path} cannot be used in the query because of randomized encryption")]
    RandomizedQueryPath { path: String },

    #[error("Unable to convert JSON to byte[]")]
    Conversion {
        #[source]
        source: ValueConversionError,
    },

    #[error("Invalid encrypted value at path {path}: {reason}")]
    InvalidCiphertext { path: String, reason: String },

    #[error("Key wrap provider failed: {0}")]
    KeyWrap(#[source] KeyWrapError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Cosmos(#[from] CosmosError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl EncryptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EncryptionError::Configuration(_) | EncryptionError::KeyWrap(_) => {
                ErrorKind::Configuration
            }
            EncryptionError::Validation(_) | EncryptionError::UnsupportedPolicyVersion { .. } => {
                ErrorKind::Validation
            }
            EncryptionError::RandomizedQueryPath { .. } => ErrorKind::Query,
            EncryptionError::Conversion { .. }
            | EncryptionError::InvalidCiphertext { .. }
            | EncryptionError::Crypto(_)
            | EncryptionError::Json(_) => ErrorKind::Data,
            EncryptionError::Timeout(_) => ErrorKind::Timeout,
            EncryptionError::Cosmos(_) => ErrorKind::Service,
        }
    }

    /// Status code of a passed-through service error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            EncryptionError::Cosmos(err) => Some(err.status_code),
            _ => None,
        }
    }

    pub(crate) fn conversion(source: impl Into<ValueConversionError>) -> Self {
        EncryptionError::Conversion {
            source: source.into(),
        }
    }
}
