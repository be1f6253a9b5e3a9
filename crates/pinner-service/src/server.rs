// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Admin API of a pinner node.
//!
//! A small control plane consumed by the portal: pin/unpin intents, sweep
//! control, and a health probe. Everything is JSON over HTTP.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pinner_core::Skylink;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::node::{IntentError, PinnerNode, SweepStatus};

/// Response body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    /// Whether the shared store currently answers queries.
    pub db_alive: bool,
    /// The cluster-wide minimum number of pinners.
    pub min_pinners: usize,
}

/// Request body of the pin and unpin intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SkylinkRequest {
    skylink: String,
}

/// Response body of `POST /sweep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SweepAccepted {
    href: String,
}

/// Error response of the admin API.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("invalid skylink")]
    InvalidSkylink,
    #[error("{0}")]
    Internal(String),
}

impl From<IntentError> for ApiError {
    fn from(error: IntentError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidSkylink => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Builds the admin API router for the given node.
pub fn router(node: Arc<PinnerNode>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/pin", post(post_pin))
        .route("/unpin", post(post_unpin))
        .route("/sweep", post(post_sweep))
        .route("/sweep/status", get(get_sweep_status))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves the admin API until the token is cancelled.
pub async fn serve(
    node: Arc<PinnerNode>,
    address: SocketAddr,
    cancel_token: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "admin API listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
}

async fn get_health(State(node): State<Arc<PinnerNode>>) -> Json<HealthInfo> {
    let (db_alive, min_pinners) = node.health_info().await;
    Json(HealthInfo {
        db_alive,
        min_pinners,
    })
}

async fn post_pin(
    State(node): State<Arc<PinnerNode>>,
    Json(body): Json<SkylinkRequest>,
) -> Result<StatusCode, ApiError> {
    let skylink = parse_skylink(&body.skylink)?;
    node.pin_skylink(skylink).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_unpin(
    State(node): State<Arc<PinnerNode>>,
    Json(body): Json<SkylinkRequest>,
) -> Result<StatusCode, ApiError> {
    let skylink = parse_skylink(&body.skylink)?;
    node.unpin_skylink(skylink).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_sweep(State(node): State<Arc<PinnerNode>>) -> impl IntoResponse {
    // Never blocks: a sweep is started unless one is already running, and
    // the caller polls the status endpoint either way.
    node.start_sweep();
    (
        StatusCode::ACCEPTED,
        Json(SweepAccepted {
            href: "/sweep/status".to_owned(),
        }),
    )
}

async fn get_sweep_status(State(node): State<Arc<PinnerNode>>) -> Json<SweepStatus> {
    Json(node.sweep_status())
}

fn parse_skylink(input: &str) -> Result<Skylink, ApiError> {
    input.parse().map_err(|_| ApiError::InvalidSkylink)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request},
    };
    use http_body_util::BodyExt as _;
    use pinner_core::test_utils::skylink_for_seed;
    use tower::ServiceExt as _;

    use super::*;
    use crate::test_utils::{FakeDaemon, InMemoryStore};

    const SERVER: &str = "eu-ger-1.example.net";

    fn test_router() -> (Router, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let daemon = Arc::new(FakeDaemon::new());
        let config = crate::config::PinnerConfig {
            server_name: SERVER.to_owned(),
            ..Default::default()
        };
        let node = PinnerNode::builder()
            .with_store(Arc::clone(&store) as _)
            .with_daemon(daemon as _)
            .build(&config)
            .unwrap();
        (router(Arc::new(node)), store)
    }

    fn json_post(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_the_store_state() {
        let (router, _store) = test_router();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            health,
            HealthInfo {
                db_alive: true,
                min_pinners: 1
            }
        );
    }

    #[tokio::test]
    async fn pinning_a_valid_skylink_returns_no_content() {
        let (router, store) = test_router();
        let skylink = skylink_for_seed(1);
        let response = router
            .oneshot(json_post("/pin", format!(r#"{{"skylink":"{skylink}"}}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.record(&skylink).unwrap().servers, vec![SERVER.to_owned()]);
    }

    #[tokio::test]
    async fn pinning_an_invalid_skylink_is_a_bad_request() {
        let (router, _store) = test_router();
        let response = router
            .oneshot(json_post("/pin", r#"{"skylink":"not-a-skylink"}"#.to_owned()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unpinning_marks_the_record() {
        let (router, store) = test_router();
        let skylink = skylink_for_seed(1);
        let response = router
            .oneshot(json_post("/unpin", format!(r#"{{"skylink":"{skylink}"}}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!store.record(&skylink).unwrap().pinned);
    }

    #[tokio::test]
    async fn sweeps_are_accepted_with_a_status_link() {
        let (router, _store) = test_router();
        let response = router
            .clone()
            .oneshot(Request::post("/sweep").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let accepted: SweepAccepted = serde_json::from_slice(&body).unwrap();
        assert_eq!(accepted.href, "/sweep/status");

        let response = router
            .oneshot(Request::get("/sweep/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
