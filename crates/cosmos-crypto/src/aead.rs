//! AEAD_AES_256_CBC_HMAC_SHA256 field encryption.
//!
//! Cipher text layout:
//! [1 byte: version=0x01][32 bytes: HMAC-SHA256 tag][16 bytes: IV][N bytes: AES-256-CBC ciphertext]
//!
//! The tag covers `version || IV || ciphertext || version_size(0x01)`.
//! The three working keys are derived from the 32-byte root key by HMAC-SHA256
//! over fixed UTF-16LE labels, so every holder of the root key derives the same
//! encryption, MAC, and IV keys.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::types::{
    EncryptionType, AES_BLOCK_SIZE, ALGORITHM_VERSION, AUTH_TAG_LENGTH, ROOT_KEY_LENGTH,
};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const ENCRYPTION_KEY_LABEL: &str = "Microsoft SQL Server cell encryption key with encryption algorithm:AEAD_AES_256_CBC_HMAC_SHA256 and key length:256";
const MAC_KEY_LABEL: &str = "Microsoft SQL Server cell MAC key with encryption algorithm:AEAD_AES_256_CBC_HMAC_SHA256 and key length:256";
const IV_KEY_LABEL: &str = "Microsoft SQL Server cell IV key with encryption algorithm:AEAD_AES_256_CBC_HMAC_SHA256 and key length:256";

/// Size of the version byte, appended to the MAC input.
const VERSION_SIZE: u8 = 1;

/// Smallest valid cipher text: version, tag, IV, and one padded block.
pub const MIN_CIPHERTEXT_LENGTH: usize = 1 + AUTH_TAG_LENGTH + AES_BLOCK_SIZE + AES_BLOCK_SIZE;

fn utf16_le(label: &str) -> Vec<u8> {
    label.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(format!("HMAC init failed: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Generate a random 16-byte IV for randomized encryption.
fn generate_iv() -> Result<[u8; AES_BLOCK_SIZE], CryptoError> {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// Field cipher bound to one unwrapped client encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AeadAes256CbcHmacSha256 {
    encryption_key: [u8; 32],
    mac_key: [u8; 32],
    iv_key: [u8; 32],
}

impl AeadAes256CbcHmacSha256 {
    /// Derive the working keys from a 32-byte root key.
    pub fn new(root_key: &[u8]) -> Result<Self, CryptoError> {
        if root_key.len() != ROOT_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: ROOT_KEY_LENGTH,
                got: root_key.len(),
            });
        }
        Ok(Self {
            encryption_key: hmac_sha256(root_key, &[&utf16_le(ENCRYPTION_KEY_LABEL)])?,
            mac_key: hmac_sha256(root_key, &[&utf16_le(MAC_KEY_LABEL)])?,
            iv_key: hmac_sha256(root_key, &[&utf16_le(IV_KEY_LABEL)])?,
        })
    }

    /// Encrypt `plaintext`.
    ///
    /// Deterministic mode takes the IV from the first 16 bytes of
    /// HMAC-SHA256(iv_key, plaintext); randomized mode draws it from the OS RNG.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        encryption_type: EncryptionType,
    ) -> Result<Vec<u8>, CryptoError> {
        let iv = match encryption_type {
            EncryptionType::Deterministic => {
                let digest = hmac_sha256(&self.iv_key, &[plaintext])?;
                let mut iv = [0u8; AES_BLOCK_SIZE];
                iv.copy_from_slice(&digest[..AES_BLOCK_SIZE]);
                iv
            }
            EncryptionType::Randomized => generate_iv()?,
        };

        let ciphertext = Aes256CbcEnc::new_from_slices(&self.encryption_key, &iv)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let tag = hmac_sha256(
            &self.mac_key,
            &[&[ALGORITHM_VERSION], &iv, &ciphertext, &[VERSION_SIZE]],
        )?;

        let mut result = Vec::with_capacity(1 + tag.len() + iv.len() + ciphertext.len());
        result.push(ALGORITHM_VERSION);
        result.extend_from_slice(&tag);
        result.extend_from_slice(&iv);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Verify the tag and decrypt a cipher text produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < MIN_CIPHERTEXT_LENGTH {
            return Err(CryptoError::DataTooShort {
                min: MIN_CIPHERTEXT_LENGTH,
                got: ciphertext.len(),
            });
        }

        let version = ciphertext[0];
        if version != ALGORITHM_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }

        let tag = &ciphertext[1..1 + AUTH_TAG_LENGTH];
        let iv = &ciphertext[1 + AUTH_TAG_LENGTH..1 + AUTH_TAG_LENGTH + AES_BLOCK_SIZE];
        let body = &ciphertext[1 + AUTH_TAG_LENGTH + AES_BLOCK_SIZE..];
        if body.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::DecryptionFailed(format!(
                "ciphertext length {} is not a multiple of the block size",
                body.len()
            )));
        }

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| CryptoError::DecryptionFailed(format!("HMAC init failed: {}", e)))?;
        mac.update(&[version]);
        mac.update(iv);
        mac.update(body);
        mac.update(&[VERSION_SIZE]);
        mac.verify_slice(tag)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        Aes256CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl std::fmt::Debug for AeadAes256CbcHmacSha256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AeadAes256CbcHmacSha256([REDACTED])")
    }
}
