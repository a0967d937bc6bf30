//! HTTPS client for the label service.

use crate::sync::config::SyncConfig;
use crate::sync::models::{BatchBundle, LabelBundle, PullResponse};
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Operations offered by a label service.
///
/// Implementations never retry; whether and when to try again is up to
/// the caller.
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Upload a single changed label
    async fn push_one(&self, bundle: &LabelBundle) -> Result<()>;

    /// Upload every label of a wallet
    async fn push_all(&self, bundle: &BatchBundle) -> Result<()>;

    /// Fetch labels stored at or after `nonce`
    async fn pull_since(&self, wallet_id: &str, nonce: u64) -> Result<PullResponse>;
}

/// Path of the incremental download endpoint
pub fn pull_path(wallet_id: &str, nonce: u64) -> String {
    format!("/labels/since/{}/for/{}", nonce, wallet_id)
}

/// Validate a service response and decode its JSON body.
///
/// Anything but 200 is a failure, and so is a 200 whose body carries a
/// top-level `error` field.
pub fn check_response(status: u16, body: &str) -> Result<Value> {
    if status != 200 {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").map(error_message))
            .unwrap_or_else(|| body.trim().to_string());
        return Err(SyncError::Request { status, message });
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| SyncError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    if let Some(error) = value.get("error") {
        return Err(SyncError::Request {
            status,
            message: error_message(error),
        });
    }

    Ok(value)
}

fn error_message(error: &Value) -> String {
    match error.as_str() {
        Some(s) => s.to_string(),
        None => error.to_string(),
    }
}

/// reqwest-backed client for a label service reachable over HTTPS.
pub struct SyncClient {
    client: reqwest::Client,
    base_url: String,
}

impl SyncClient {
    /// Create a new client for the configured `host:port`.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .https_only(true)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let body =
            serde_json::to_vec(body).map_err(|e| SyncError::Transport(e.to_string()))?;

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Self::read(resp).await
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Self::read(resp).await
    }

    async fn read(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        check_response(status, &body)
    }
}

#[async_trait]
impl LabelService for SyncClient {
    async fn push_one(&self, bundle: &LabelBundle) -> Result<()> {
        self.post_json("/label", bundle).await?;
        Ok(())
    }

    async fn push_all(&self, bundle: &BatchBundle) -> Result<()> {
        self.post_json("/labels", bundle).await?;
        Ok(())
    }

    async fn pull_since(&self, wallet_id: &str, nonce: u64) -> Result<PullResponse> {
        let value = self.get_json(&pull_path(wallet_id, nonce)).await?;
        PullResponse::from_value(&value)
    }
}
