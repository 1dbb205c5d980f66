//! Origin web API
//!
//! The origin's web endpoint serves its issuer key set at the WLCG
//! well-known path (the data plane and the director verify tokens against
//! it) and accepts health test reports from the director.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::debug;

use pelican_core::{HealthMonitor, HealthStatus, IssuerKey, Jwks};

use crate::selftest::SELF_TEST_COMPONENT;

/// Shared state for the origin handlers
pub struct OriginState {
    pub key: IssuerKey,
    pub health: HealthMonitor,
}

/// GET /.well-known/issuer.jwks
pub async fn issuer_jwks(State(state): State<Arc<OriginState>>) -> Json<Jwks> {
    Json(state.key.public_jwks())
}

/// GET /health
pub async fn health(State(state): State<Arc<OriginState>>) -> Json<Value> {
    Json(json!({
        "status": state.health.overall().to_string(),
        "components": state.health.snapshot(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DirectorTestReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Receive a health test result from the director
///
/// POST /api/v1.0/origin/directorTest
pub async fn director_test(
    State(state): State<Arc<OriginState>>,
    Json(report): Json<DirectorTestReport>,
) -> Json<Value> {
    debug!(status = %report.status, message = %report.message, "Director test report received");
    let status = if report.status == "success" {
        HealthStatus::Ok
    } else {
        HealthStatus::Critical
    };
    state.health.set(SELF_TEST_COMPONENT, status);
    Json(json!({ "message": "success" }))
}

/// Create the origin API router
pub fn create_router(state: Arc<OriginState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/issuer.jwks", get(issuer_jwks))
        .route("/api/v1.0/origin/directorTest", post(director_test))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
