//! Axum router setup.

use crate::config::RelayConfig;
use crate::handlers::labels;
use crate::storage::RelayStorage;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub storage: RelayStorage,
    pub max_labels_per_wallet: usize,
}

pub fn build_router(storage: RelayStorage, config: &RelayConfig) -> Router {
    let state = AppState {
        storage,
        max_labels_per_wallet: config.max_labels_per_wallet,
    };

    Router::new()
        .route("/label", post(labels::push_label))
        .route("/labels", post(labels::push_labels))
        .route(
            "/labels/since/{nonce}/for/{wallet_id}",
            get(labels::labels_since),
        )
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const WALLET: &str = "187da86d2d6bb32f43d111ed19573feaed560f22d59c3eb44edf694be2222a6c";

    fn app_with(config: RelayConfig) -> Router {
        build_router(RelayStorage::in_memory().unwrap(), &config)
    }

    fn app() -> Router {
        app_with(RelayConfig::default())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn since(nonce: u64) -> String {
        format!("/labels/since/{}/for/{}", nonce, WALLET)
    }

    #[tokio::test]
    async fn health_check() {
        let response = app().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_wallet_returns_null_labels() {
        let (status, body) = send(&app(), get_req(&since(0))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"labels": null, "nonce": 0}));
    }

    #[tokio::test]
    async fn pushed_label_is_pulled_back() {
        let app = app();
        let (status, body) = send(
            &app,
            post_json(
                "/label",
                json!({
                    "walletId": WALLET,
                    "walletNonce": 1,
                    "externalId": "hQZPqLRoDQ3kmTLzbaGF2Q==",
                    "encryptedLabel": "FzzCkFLfI4fvvbOKF/F3fg=="
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, body) = send(&app, get_req(&since(0))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "labels": [{
                    "externalId": "hQZPqLRoDQ3kmTLzbaGF2Q==",
                    "encryptedLabel": "FzzCkFLfI4fvvbOKF/F3fg=="
                }],
                "nonce": 1
            })
        );

        let (_, body) = send(&app, get_req(&since(2))).await;
        assert_eq!(body, json!({"labels": null, "nonce": 1}));
    }

    #[tokio::test]
    async fn batch_push_stores_all_labels() {
        let app = app();
        let (status, body) = send(
            &app,
            post_json(
                "/labels",
                json!({
                    "walletId": WALLET,
                    "walletNonce": 4,
                    "labels": [
                        {"externalId": "a", "encryptedLabel": "A"},
                        {"externalId": "b", "encryptedLabel": "B"}
                    ]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (_, body) = send(&app, get_req(&since(4))).await;
        assert_eq!(body["labels"].as_array().unwrap().len(), 2);
        assert_eq!(body["nonce"], 4);
    }

    #[tokio::test]
    async fn invalid_wallet_id_is_rejected() {
        let (status, body) = send(&app(), get_req("/labels/since/0/for/not-a-wallet")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid wallet id");
    }

    #[tokio::test]
    async fn empty_entry_is_rejected() {
        let (status, body) = send(
            &app(),
            post_json(
                "/label",
                json!({
                    "walletId": WALLET,
                    "walletNonce": 1,
                    "externalId": "",
                    "encryptedLabel": "x"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn label_limit_is_enforced() {
        let app = app_with(RelayConfig {
            max_labels_per_wallet: 1,
            ..RelayConfig::default()
        });
        let (status, body) = send(
            &app,
            post_json(
                "/labels",
                json!({
                    "walletId": WALLET,
                    "walletNonce": 1,
                    "labels": [
                        {"externalId": "a", "encryptedLabel": "A"},
                        {"externalId": "b", "encryptedLabel": "B"}
                    ]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
        assert!(body["error"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = app_with(RelayConfig {
            max_payload_size: 64,
            ..RelayConfig::default()
        });
        let entry = json!({"externalId": "a".repeat(100), "encryptedLabel": "A"});
        let request = post_json(
            "/labels",
            json!({"walletId": WALLET, "walletNonce": 1, "labels": [entry]}),
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
