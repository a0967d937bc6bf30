//! AES-256-CBC encoding of label strings.
//!
//! Wire format is standard base64 of the PKCS#7-padded CBC ciphertext.
//! The IV is fixed per wallet, so equal plaintexts encode identically.

use crate::crypto::{CryptoError, Result, SyncKeyMaterial};
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Encrypt a label string and return it base64-encoded.
pub fn encode(material: &SyncKeyMaterial, plaintext: &str) -> String {
    let cipher = Aes256CbcEnc::new(material.key().into(), material.iv().into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    STANDARD.encode(ciphertext)
}

/// Decrypt a base64-encoded label produced by [`encode`].
///
/// Fails on malformed base64, a ciphertext that is not a whole number of
/// blocks, bad padding, or plaintext that is not UTF-8.
pub fn decode(material: &SyncKeyMaterial, message: &str) -> Result<String> {
    let ciphertext = STANDARD
        .decode(message)
        .map_err(|e| CryptoError::Decode(format!("invalid base64: {}", e)))?;

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Decode(format!(
            "ciphertext length {} is not a multiple of {}",
            ciphertext.len(),
            BLOCK_SIZE
        )));
    }

    let cipher = Aes256CbcDec::new(material.key().into(), material.iv().into());
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::Decode("invalid padding".to_string()))?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Decode("invalid UTF-8".to_string()))
}
