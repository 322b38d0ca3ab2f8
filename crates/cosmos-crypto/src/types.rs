use serde::{Deserialize, Serialize};

/// Name of the only data encryption algorithm this library generation supports.
pub const AEAD_AES_256_CBC_HMAC_SHA256: &str = "AEAD_AES_256_CBC_HMAC_SHA256";

/// Algorithm name understood by the AES key wrap provider (RFC 3394, 256-bit KEK).
pub const A256KW: &str = "A256KW";

/// Root (data encryption) key length in bytes (256 bits).
pub const ROOT_KEY_LENGTH: usize = 32;

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES block size, also the CBC IV length.
pub const AES_BLOCK_SIZE: usize = 16;

/// HMAC-SHA256 output length, used in full as the authentication tag.
pub const AUTH_TAG_LENGTH: usize = 32;

/// Cipher text version byte written at the front of every AEAD blob.
pub const ALGORITHM_VERSION: u8 = 0x01;

/// How a value is encrypted under a client encryption key.
///
/// Deterministic encryption derives the IV from the plaintext, so equal
/// plaintexts produce equal cipher texts and support equality queries.
/// Randomized encryption draws a fresh IV for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    Deterministic,
    Randomized,
}

impl std::fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionType::Deterministic => write!(f, "Deterministic"),
            EncryptionType::Randomized => write!(f, "Randomized"),
        }
    }
}
