//! Wallet abstraction consumed by the sync layer.
//!
//! The host application owns the wallet; label sync only needs its label
//! mapping, a key/value storage with deferred flushing, and the master
//! public keys the sync key is derived from.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryWallet;
pub use sqlite::SqliteWallet;

use crate::StorageError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage key holding the label mapping
pub const LABELS_KEY: &str = "labels";

/// Storage key holding the master public keys
pub const MASTER_PUBLIC_KEYS_KEY: &str = "master_public_keys";

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque handle the host uses to refer to an open wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletHandle(u64);

impl WalletHandle {
    /// Allocate a process-unique handle
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wallet#{}", self.0)
    }
}

/// Wallet operations label sync relies on.
pub trait LabelWallet: Send {
    /// Short human-readable name, used in log lines
    fn basename(&self) -> &str;

    /// Master public keys, in any order
    fn master_public_keys(&self) -> Vec<String>;

    fn labels(&self) -> &BTreeMap<String, String>;

    fn labels_mut(&mut self) -> &mut BTreeMap<String, String>;

    /// Read a raw storage value
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Write a raw storage value.
    ///
    /// With `force_flush == false` the value is only staged; it reaches disk
    /// with the next forced write or [`LabelWallet::flush`].
    fn put(
        &mut self,
        key: &str,
        value: serde_json::Value,
        force_flush: bool,
    ) -> Result<(), StorageError>;

    /// Persist all staged writes
    fn flush(&mut self) -> Result<(), StorageError>;
}

/// A wallet shared between the host and background sync tasks.
///
/// The mutex serializes every label and nonce write for the wallet. It is
/// never held across an `.await`.
pub type SharedWallet = Arc<Mutex<dyn LabelWallet>>;

/// Wrap a wallet for sharing with the sync scheduler
pub fn share<W: LabelWallet + 'static>(wallet: W) -> SharedWallet {
    Arc::new(Mutex::new(wallet))
}

/// Lock a shared wallet, mapping poisoning to a storage error
pub fn lock_wallet<'a>(
    wallet: &'a SharedWallet,
    context: &str,
) -> Result<MutexGuard<'a, dyn LabelWallet + 'static>, StorageError> {
    wallet
        .lock()
        .map_err(|_| StorageError::LockPoisoned(context.to_string()))
}

/// Serialize a label mapping into its storage representation
pub fn labels_to_value(labels: &BTreeMap<String, String>) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(labels).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Parse a stored label mapping, skipping non-string values
pub fn labels_from_value(value: &serde_json::Value) -> BTreeMap<String, String> {
    let Some(map) = value.as_object() else {
        tracing::warn!("Stored labels are not an object; ignoring");
        return BTreeMap::new();
    };

    map.iter()
        .filter_map(|(k, v)| match v.as_str() {
            Some(s) => Some((k.clone(), s.to_string())),
            None => {
                tracing::warn!("Skipping non-string label for {}", k);
                None
            }
        })
        .collect()
}
