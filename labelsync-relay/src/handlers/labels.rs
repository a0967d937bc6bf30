//! Label push/pull handlers.
//!
//! The relay never sees plaintext: external ids and labels arrive as
//! base64 ciphertexts and are stored as-is.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEntry {
    pub external_id: String,
    pub encrypted_label: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushLabelRequest {
    pub wallet_id: String,
    pub wallet_nonce: u64,
    pub external_id: String,
    pub encrypted_label: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushLabelsRequest {
    pub wallet_id: String,
    pub wallet_nonce: u64,
    pub labels: Vec<LabelEntry>,
}

#[derive(Serialize)]
pub struct SinceResponse {
    /// `None` when nothing changed, serialized as `null`
    pub labels: Option<Vec<LabelEntry>>,
    pub nonce: u64,
}

/// Wallet ids are hex SHA-256 digests
fn validate_wallet_id(wallet_id: &str) -> Result<(), RelayError> {
    if wallet_id.len() == 64 && wallet_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(RelayError::BadRequest("Invalid wallet id".to_string()))
    }
}

fn validate_entry(external_id: &str, encrypted_label: &str) -> Result<(), RelayError> {
    if external_id.is_empty() || encrypted_label.is_empty() {
        return Err(RelayError::BadRequest("Empty label entry".to_string()));
    }
    Ok(())
}

pub async fn push_label(
    State(state): State<AppState>,
    Json(req): Json<PushLabelRequest>,
) -> Result<Json<Value>, RelayError> {
    validate_wallet_id(&req.wallet_id)?;
    validate_entry(&req.external_id, &req.encrypted_label)?;

    let nonce = state.storage.store_labels(
        &req.wallet_id,
        req.wallet_nonce,
        &[(req.external_id, req.encrypted_label)],
        state.max_labels_per_wallet,
    )?;

    tracing::debug!("stored 1 label for {}, wallet nonce {}", req.wallet_id, nonce);
    Ok(Json(json!({})))
}

pub async fn push_labels(
    State(state): State<AppState>,
    Json(req): Json<PushLabelsRequest>,
) -> Result<Json<Value>, RelayError> {
    validate_wallet_id(&req.wallet_id)?;
    for entry in &req.labels {
        validate_entry(&entry.external_id, &entry.encrypted_label)?;
    }

    let labels: Vec<(String, String)> = req
        .labels
        .into_iter()
        .map(|entry| (entry.external_id, entry.encrypted_label))
        .collect();
    let nonce = state.storage.store_labels(
        &req.wallet_id,
        req.wallet_nonce,
        &labels,
        state.max_labels_per_wallet,
    )?;

    tracing::info!(
        "stored {} labels for {}, wallet nonce {}",
        labels.len(),
        req.wallet_id,
        nonce
    );
    Ok(Json(json!({})))
}

pub async fn labels_since(
    State(state): State<AppState>,
    Path((since, wallet_id)): Path<(u64, String)>,
) -> Result<Json<SinceResponse>, RelayError> {
    validate_wallet_id(&wallet_id)?;

    let (stored, nonce) = state.storage.labels_since(&wallet_id, since)?;
    if let Some(newest) = stored.last() {
        tracing::debug!(
            "sending {} labels for {} from nonce {} to {}",
            stored.len(),
            wallet_id,
            since,
            newest.nonce
        );
    }
    let labels = if stored.is_empty() {
        None
    } else {
        Some(
            stored
                .into_iter()
                .map(|label| LabelEntry {
                    external_id: label.external_id,
                    encrypted_label: label.encrypted_label,
                })
                .collect(),
        )
    };

    Ok(Json(SinceResponse { labels, nonce }))
}
