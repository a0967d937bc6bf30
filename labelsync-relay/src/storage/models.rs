//! Relay storage model types.

/// One stored label: opaque ciphertexts plus the nonce it was pushed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLabel {
    pub external_id: String,
    pub encrypted_label: String,
    pub nonce: u64,
}
