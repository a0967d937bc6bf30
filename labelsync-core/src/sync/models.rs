//! Label service wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, SyncError};

/// One label as the service stores it: both halves encrypted separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedLabelEntry {
    /// Encrypted label key (address, txid, ...)
    pub external_id: String,
    /// Encrypted label text
    pub encrypted_label: String,
}

/// Body of `POST /label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelBundle {
    pub wallet_id: String,
    pub wallet_nonce: u64,
    pub external_id: String,
    pub encrypted_label: String,
}

/// Body of `POST /labels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBundle {
    pub wallet_id: String,
    pub wallet_nonce: u64,
    pub labels: Vec<EncryptedLabelEntry>,
}

/// Body returned by `GET /labels/since/{nonce}/for/{walletId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// `None` when the service has nothing new
    pub labels: Option<Vec<EncryptedLabelEntry>>,
    /// Highest nonce the service has accepted for the wallet
    pub nonce: u64,
}

impl PullResponse {
    /// Validate a decoded JSON body.
    ///
    /// Both `labels` and `nonce` must be present. Individual label objects
    /// that lack either field are dropped rather than failing the pull.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::MalformedResponse("body is not an object".to_string()))?;

        let nonce = object
            .get("nonce")
            .ok_or_else(|| SyncError::MalformedResponse("missing nonce".to_string()))?
            .as_u64()
            .ok_or_else(|| {
                SyncError::MalformedResponse("nonce is not a non-negative integer".to_string())
            })?;

        let labels = match object.get("labels") {
            None => return Err(SyncError::MalformedResponse("missing labels".to_string())),
            Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|item| {
                        serde_json::from_value::<EncryptedLabelEntry>(item.clone())
                            .map_err(|e| tracing::warn!("Dropping malformed label entry: {}", e))
                            .ok()
                    })
                    .collect(),
            ),
            Some(_) => {
                return Err(SyncError::MalformedResponse(
                    "labels is neither a list nor null".to_string(),
                ))
            }
        };

        Ok(Self { labels, nonce })
    }
}
