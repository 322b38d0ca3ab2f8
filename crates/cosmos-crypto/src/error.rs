use thiserror::Error;

/// Failures of the field cipher, key wrap and signing primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Encrypted data too short: expected at least {min} bytes, got {got}")]
    DataTooShort { min: usize, got: usize },

    #[error("Unsupported cipher text version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid authentication tag")]
    AuthenticationFailed,

    #[error("Invalid wrapped key length: expected {expected} bytes, got {got}")]
    InvalidWrappedKeyLength { expected: usize, got: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("AES-KW wrap failed: {0}")]
    WrapFailed(String),

    #[error("AES-KW unwrap failed: {0}")]
    UnwrapFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
