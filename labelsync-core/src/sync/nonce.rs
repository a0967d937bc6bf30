//! Per-wallet nonce persistence.
//!
//! The stored value is always the nonce to use for the *next* outgoing
//! change. It only ever moves forward.

use crate::wallet::LabelWallet;
use crate::StorageError;
use serde_json::json;

/// Storage key of the nonce
pub const NONCE_KEY: &str = "wallet_nonce";

/// Nonce of a wallet that has never synced
pub const INITIAL_NONCE: u64 = 1;

pub struct NonceStore;

impl NonceStore {
    /// Current nonce, initialized to [`INITIAL_NONCE`] (and flushed) if absent.
    pub fn get_nonce(wallet: &mut dyn LabelWallet) -> Result<u64, StorageError> {
        match wallet.get(NONCE_KEY) {
            Some(value) => match value.as_u64() {
                Some(nonce) => Ok(nonce),
                None => {
                    tracing::warn!(
                        "Unreadable nonce {} for {}; resetting",
                        value,
                        wallet.basename()
                    );
                    Self::initialize(wallet)
                }
            },
            None => Self::initialize(wallet),
        }
    }

    /// Store a new nonce. Values below the stored one are ignored.
    ///
    /// Returns the nonce in effect afterwards. With `force_flush == false`
    /// the write rides along with the caller's next flush.
    pub fn set_nonce(
        wallet: &mut dyn LabelWallet,
        value: u64,
        force_flush: bool,
    ) -> Result<u64, StorageError> {
        if let Some(current) = wallet.get(NONCE_KEY).and_then(|v| v.as_u64()) {
            if value < current {
                tracing::warn!(
                    "Refusing to move nonce of {} back from {} to {}",
                    wallet.basename(),
                    current,
                    value
                );
                return Ok(current);
            }
        }

        tracing::debug!("set {} nonce to {}", wallet.basename(), value);
        wallet.put(NONCE_KEY, json!(value), force_flush)?;
        Ok(value)
    }

    /// Reserve the current nonce for an outgoing change and advance the
    /// stored value past it without flushing.
    pub fn reserve(wallet: &mut dyn LabelWallet) -> Result<u64, StorageError> {
        let nonce = Self::get_nonce(wallet)?;
        Self::set_nonce(wallet, nonce.saturating_add(1), false)?;
        Ok(nonce)
    }

    fn initialize(wallet: &mut dyn LabelWallet) -> Result<u64, StorageError> {
        tracing::debug!("set {} nonce to {}", wallet.basename(), INITIAL_NONCE);
        wallet.put(NONCE_KEY, json!(INITIAL_NONCE), true)?;
        Ok(INITIAL_NONCE)
    }
}
