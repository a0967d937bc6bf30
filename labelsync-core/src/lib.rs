//! Label Sync Core Library
//!
//! Synchronizes wallet label annotations across devices through a remote
//! label service while keeping label contents confidential from it:
//! - Deterministic per-wallet AES-256-CBC key derived from master public keys
//! - Per-wallet monotonic nonce used as a logical clock
//! - Background push/pull reconciliation driven by wallet lifecycle hooks

pub mod crypto;
pub mod platform;
pub mod sync;
pub mod wallet;

pub use crypto::{decode, derive_key_material, encode, CryptoError, SyncKeyMaterial};
pub use sync::{
    LabelService, ReconcileEngine, SyncClient, SyncConfig, SyncEvent, SyncScheduler, SyncState,
};
pub use wallet::{LabelWallet, MemoryWallet, SharedWallet, SqliteWallet, WalletHandle};

use thiserror::Error;

/// Result type for label sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by wallet storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// General error type for label sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Wallet {0} is not registered for sync")]
    NotRegistered(WalletHandle),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
