//! Root key generation and AES key wrap (RFC 3394).
//!
//! Every client encryption key owns a random 256-bit root key. The root key is
//! never stored in the clear: it is wrapped under a key encryption key held by
//! a key wrap provider.
//!
//! Wrapped key format: AES-KW(KEK, root key), 40 bytes for a 32-byte root key.

use aes_kw::KekAes256;

use crate::error::CryptoError;
use crate::types::{AES_KEY_LENGTH, ROOT_KEY_LENGTH};

/// AES-KW adds one 64-bit integrity block to its input.
const AES_KW_OVERHEAD: usize = 8;

/// Size of a wrapped root key in bytes.
pub const WRAPPED_KEY_SIZE: usize = ROOT_KEY_LENGTH + AES_KW_OVERHEAD;

/// Generate a random 256-bit root key for a new client encryption key.
pub fn generate_root_key() -> Result<[u8; ROOT_KEY_LENGTH], CryptoError> {
    let mut key = [0u8; ROOT_KEY_LENGTH];
    getrandom::getrandom(&mut key).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(key)
}

fn kek_from_slice(kek: &[u8]) -> Result<KekAes256, CryptoError> {
    let kek_array: [u8; AES_KEY_LENGTH] =
        kek.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: kek.len(),
        })?;
    Ok(KekAes256::from(kek_array))
}

/// Wrap a root key with a 256-bit KEK using AES-KW.
///
/// # Arguments
/// * `key` - 32-byte root key
/// * `kek` - 32-byte key encryption key
///
/// # Returns
/// 40-byte wrapped key
pub fn wrap_key(key: &[u8], kek: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != ROOT_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: ROOT_KEY_LENGTH,
            got: key.len(),
        });
    }
    let kek_key = kek_from_slice(kek)?;
    let mut wrapped = vec![0u8; WRAPPED_KEY_SIZE];
    kek_key
        .wrap(key, &mut wrapped)
        .map_err(|e| CryptoError::WrapFailed(format!("{:?}", e)))?;
    Ok(wrapped)
}

/// Unwrap a root key previously produced by [`wrap_key`].
///
/// # Arguments
/// * `wrapped` - 40-byte wrapped key
/// * `kek` - 32-byte key encryption key
pub fn unwrap_key(wrapped: &[u8], kek: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(CryptoError::InvalidWrappedKeyLength {
            expected: WRAPPED_KEY_SIZE,
            got: wrapped.len(),
        });
    }
    let kek_key = kek_from_slice(kek)?;
    let mut key = vec![0u8; ROOT_KEY_LENGTH];
    kek_key
        .unwrap(wrapped, &mut key)
        .map_err(|e| CryptoError::UnwrapFailed(format!("{:?}", e)))?;
    Ok(key)
}
