//! Cryptographic primitives for label sync.
//!
//! This module provides:
//! - Deterministic key, IV and wallet id derivation from master public keys
//! - AES-256-CBC encoding/decoding of individual label strings

pub mod cipher;
pub mod keys;

pub use cipher::{decode, encode, BLOCK_SIZE};
pub use keys::{derive_key_material, SyncKeyMaterial, IV_LEN, KEY_LEN};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Wallet has no master public keys; sync disabled")]
    NoPublicKeys,

    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
