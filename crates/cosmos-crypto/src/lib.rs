pub mod aead;
pub mod error;
pub mod key_wrap;
pub mod signing;
pub mod types;

pub use aead::AeadAes256CbcHmacSha256;
pub use error::CryptoError;
pub use key_wrap::{generate_root_key, unwrap_key, wrap_key, WRAPPED_KEY_SIZE};
pub use signing::{generate_signing_key, key_metadata_message, sign, verify};
pub use types::{EncryptionType, A256KW, AEAD_AES_256_CBC_HMAC_SHA256, ROOT_KEY_LENGTH};

pub use p256::ecdsa::{SigningKey, VerifyingKey};
