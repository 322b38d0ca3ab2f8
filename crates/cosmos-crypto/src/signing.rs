//! ECDSA P-256 signing of key encryption key metadata.
//!
//! Produces IEEE P1363 format signatures (raw r||s, 64 bytes).

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::error::CryptoError;

/// Sign a message with ECDSA P-256 + SHA-256.
pub fn sign(private_key: &SigningKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signature: Signature = private_key
        .try_sign(message)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(signature.to_bytes().to_vec())
}

/// Verify an ECDSA P-256 + SHA-256 signature.
///
/// Returns false on malformed signatures rather than erroring.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature_bytes: &[u8]) -> bool {
    match Signature::from_slice(signature_bytes) {
        Ok(signature) => public_key.verify(message, &signature).is_ok(),
        Err(_) => false,
    }
}

/// Generate a new P-256 signing key from the OS RNG.
pub fn generate_signing_key() -> Result<SigningKey, CryptoError> {
    // A random 32-byte string is a valid scalar with overwhelming probability;
    // the loop only repeats on zero or values above the curve order.
    loop {
        let mut scalar = [0u8; 32];
        getrandom::getrandom(&mut scalar).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        let key = SigningKey::from_slice(&scalar);
        zeroize::Zeroize::zeroize(&mut scalar);
        if let Ok(key) = key {
            return Ok(key);
        }
    }
}

/// Message signed for a key encryption key: lowercase key id followed by the
/// enclave-computations flag byte.
pub fn key_metadata_message(key_id: &str, allow_enclave_computations: bool) -> Vec<u8> {
    let mut message = key_id.to_lowercase().into_bytes();
    message.push(u8::from(allow_enclave_computations));
    message
}
