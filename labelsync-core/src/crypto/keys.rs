//! Sync key derivation from wallet master public keys.
//!
//! The derivation is deterministic and involves no secret exchange: any
//! device holding the same master public keys derives the same material.
//!
//! - key: first 32 lowercase hex characters of `SHA-1(mpk)`, used as the
//!   32 ASCII bytes of an AES-256 key
//! - iv: first 16 bytes of `SHA-256(key)`
//! - wallet id: lowercase hex `SHA-256(mpk)`
//!
//! where `mpk` is the concatenation of the master public keys in sorted order.

use crate::crypto::{CryptoError, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes
pub const IV_LEN: usize = 16;

/// Key material for one synced wallet.
///
/// Held only while the wallet is open; key and IV are wiped on drop.
#[derive(Clone)]
pub struct SyncKeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
    wallet_id: String,
}

impl SyncKeyMaterial {
    /// Raw AES key bytes
    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// CBC initialization vector
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Identifier the label service knows this wallet by
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }
}

impl fmt::Debug for SyncKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncKeyMaterial")
            .field("wallet_id", &self.wallet_id)
            .finish_non_exhaustive()
    }
}

impl Drop for SyncKeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

/// Derive sync key material from a wallet's master public keys.
///
/// Key order does not matter. Returns [`CryptoError::NoPublicKeys`] when
/// the keys concatenate to nothing, in which case the wallet is not synced.
pub fn derive_key_material<I, S>(public_keys: I) -> Result<SyncKeyMaterial>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut keys: Vec<String> = public_keys
        .into_iter()
        .map(|k| k.as_ref().to_owned())
        .collect();
    keys.sort();

    let mpk = Zeroizing::new(keys.concat());
    if mpk.is_empty() {
        return Err(CryptoError::NoPublicKeys);
    }

    let password = Zeroizing::new(hex::encode(Sha1::digest(mpk.as_bytes())));
    let password = &password[..KEY_LEN];

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(password.as_bytes());

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&Sha256::digest(password.as_bytes())[..IV_LEN]);

    let wallet_id = hex::encode(Sha256::digest(mpk.as_bytes()));

    Ok(SyncKeyMaterial { key, iv, wallet_id })
}
