//! In-process label service double for engine and scheduler tests.

use crate::sync::client::{check_response, LabelService};
use crate::sync::models::{BatchBundle, LabelBundle, PullResponse};
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Records every request and answers pulls with a canned body.
pub(crate) struct RecordingService {
    pub pushed: Mutex<Vec<LabelBundle>>,
    pub batches: Mutex<Vec<BatchBundle>>,
    pub pulls: Mutex<Vec<(String, u64)>>,
    pull_body: Mutex<Value>,
    push_status: Mutex<u16>,
    pull_gate: Option<Notify>,
}

impl RecordingService {
    pub fn new() -> Self {
        Self {
            pushed: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            pull_body: Mutex::new(json!({"labels": null, "nonce": 0})),
            push_status: Mutex::new(200),
            pull_gate: None,
        }
    }

    /// Pulls block until [`RecordingService::release_pull`] is called
    pub fn gated() -> Self {
        Self {
            pull_gate: Some(Notify::new()),
            ..Self::new()
        }
    }

    pub fn release_pull(&self) {
        if let Some(gate) = &self.pull_gate {
            gate.notify_one();
        }
    }

    pub fn respond_to_pull(&self, body: Value) {
        *self.pull_body.lock().unwrap() = body;
    }

    pub fn fail_pushes_with(&self, status: u16) {
        *self.push_status.lock().unwrap() = status;
    }

    fn push_result(&self) -> Result<()> {
        let status = *self.push_status.lock().unwrap();
        let body = if status == 200 {
            "{}"
        } else {
            "Internal Server Error"
        };
        check_response(status, body).map(|_| ())
    }
}

#[async_trait]
impl LabelService for RecordingService {
    async fn push_one(&self, bundle: &LabelBundle) -> Result<()> {
        self.pushed.lock().unwrap().push(bundle.clone());
        self.push_result()
    }

    async fn push_all(&self, bundle: &BatchBundle) -> Result<()> {
        self.batches.lock().unwrap().push(bundle.clone());
        self.push_result()
    }

    async fn pull_since(&self, wallet_id: &str, nonce: u64) -> Result<PullResponse> {
        self.pulls
            .lock()
            .unwrap()
            .push((wallet_id.to_string(), nonce));
        if let Some(gate) = &self.pull_gate {
            gate.notified().await;
        }
        let body = self.pull_body.lock().unwrap().clone();
        if body.get("error").is_some() {
            return Err(SyncError::Request {
                status: 200,
                message: body["error"].to_string(),
            });
        }
        PullResponse::from_value(&body)
    }
}
