//! API module for the registry server

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pelican_core::config::RegistryConfig;
use pelican_core::IssuerKey;

use crate::challenge::NonceStore;
use crate::identity::OidcClient;
use crate::storage::RegistryStore;

/// Shared state for the registry handlers
pub struct AppState {
    pub store: Arc<dyn RegistryStore>,
    /// The registry's own key, used to sign challenge payloads
    pub key: IssuerKey,
    pub config: RegistryConfig,
    pub nonces: NonceStore,
    /// Identity-provider client; absent when the identity flow is disabled
    pub oidc: Option<OidcClient>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1.0/registry",
            post(handlers::register).get(handlers::list_namespaces),
        )
        .route(
            "/api/v1.0/registry/checkNamespaceExists",
            post(handlers::check_namespace_exists),
        )
        .route(
            "/api/v1.0/registry/checkNamespaceStatus",
            post(handlers::check_namespace_status),
        )
        .route(
            "/api/v1.0/registry/{*wildcard}",
            get(handlers::well_known).delete(handlers::delete_namespace),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
