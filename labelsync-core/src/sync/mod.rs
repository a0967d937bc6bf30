//! Encrypted label sync for wallets.
//!
//! Implements confidential label synchronization against a label service:
//! - Per-label AES-256-CBC encryption with a key derived from public keys
//! - Per-wallet nonce as a logical clock ("next nonce to use")
//! - Pulls that never clobber a non-empty local label unless forced
//! - Fire-and-forget background push/pull driven by wallet hooks

pub mod client;
pub mod config;
pub mod engine;
pub mod models;
pub mod nonce;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{LabelService, SyncClient};
pub use config::SyncConfig;
pub use engine::{MergeOutcome, ReconcileEngine};
pub use models::{BatchBundle, EncryptedLabelEntry, LabelBundle, PullResponse};
pub use nonce::NonceStore;
pub use scheduler::{SyncEvent, SyncScheduler, SyncState};
