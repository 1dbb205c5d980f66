//! API module for the director server

pub mod error;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use pelican_core::config::DirectorConfig;
use pelican_core::{NamespaceAd, ServerRole, SignedAdvertisement};

use crate::catalog::Catalog;
use crate::geo::GeoResolver;
use crate::metrics;
use crate::prober::Prober;
use crate::router::{client_ip, link_header, location_url, match_path, rank, RoundRobin};
use crate::verify::AdVerifier;
use error::ApiError;

/// Shared state for the director handlers
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub verifier: AdVerifier,
    pub prober: Prober,
    pub config: DirectorConfig,
    pub geo: Arc<dyn GeoResolver>,
    pub round_robin: RoundRobin,
    /// Parent token for health suites; cancelled at shutdown
    pub shutdown: CancellationToken,
    pub client: reqwest::Client,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// GET /metrics
pub async fn metrics_endpoint() -> String {
    metrics::gather()
}

/// Accept an origin advertisement
///
/// POST /api/v1.0/director/registerOrigin
pub async fn register_origin(
    State(state): State<Arc<AppState>>,
    Json(ad): Json<SignedAdvertisement>,
) -> Result<Response, ApiError> {
    register_server(state, ad, ServerRole::Origin).await
}

/// Accept a cache advertisement
///
/// POST /api/v1.0/director/registerCache
pub async fn register_cache(
    State(state): State<Arc<AppState>>,
    Json(ad): Json<SignedAdvertisement>,
) -> Result<Response, ApiError> {
    register_server(state, ad, ServerRole::Cache).await
}

async fn register_server(
    state: Arc<AppState>,
    ad: SignedAdvertisement,
    expected_role: ServerRole,
) -> Result<Response, ApiError> {
    if ad.ad.role != expected_role {
        return Err(ApiError::BadRequest(format!(
            "advertisement role '{}' does not match the registration endpoint",
            ad.ad.role
        )));
    }

    state.verifier.verify(&ad).await?;

    let data_url = ad.ad.data_url.clone();
    let web_url = ad.ad.web_url.clone();
    let identity = state.catalog.upsert(ad, |identity| {
        // Only origins get health suites; caches are probed indirectly by
        // client traffic.
        (expected_role == ServerRole::Origin).then(|| {
            state
                .prober
                .spawn_suite(identity, data_url.clone(), web_url.clone(), &state.shutdown)
        })
    });
    debug!(identity = %identity, "Advertisement stored");

    Ok(Json(json!({ "status": "success" })).into_response())
}

/// List every namespace advertised by live origins
///
/// GET /api/v1.0/director/listNamespaces
pub async fn list_namespaces(State(state): State<Arc<AppState>>) -> Json<Vec<NamespaceAd>> {
    let namespaces: Vec<NamespaceAd> = state
        .catalog
        .snapshot()
        .into_iter()
        .filter(|entry| entry.live && entry.identity.role == ServerRole::Origin)
        .flat_map(|entry| entry.ad.namespaces)
        .collect();
    Json(namespaces)
}

/// Redirect an object request to the best endpoint
///
/// GET /api/v1.0/director/object/<path> - caches preferred, origins as fallback
/// PUT/DELETE use origins: caches cannot absorb writes.
pub async fn redirect_object(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let roles: &[ServerRole] = if method == Method::GET || method == Method::HEAD {
        &[ServerRole::Cache, ServerRole::Origin]
    } else {
        &[ServerRole::Origin]
    };
    redirect(&state, &path, &headers, roles, method == Method::GET).await
}

/// Redirect straight to an origin, bypassing caches
///
/// GET /api/v1.0/director/origin/<path>
pub async fn redirect_origin(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    redirect(&state, &path, &headers, &[ServerRole::Origin], false).await
}

async fn redirect(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    roles: &[ServerRole],
    prefer_caches: bool,
) -> Result<Response, ApiError> {
    let path = format!("/{}", path.trim_start_matches('/'));
    let snapshot = state.catalog.snapshot();

    let mut result = if prefer_caches {
        // Caches first; fall back to origins when no cache serves the path.
        let caches = match_path(&path, &snapshot, &[ServerRole::Cache]);
        if caches.live.is_empty() {
            let origins = match_path(&path, &snapshot, &[ServerRole::Origin]);
            crate::router::MatchResult {
                live: origins.live,
                stale: caches.stale + origins.stale,
            }
        } else {
            caches
        }
    } else {
        match_path(&path, &snapshot, roles)
    };

    if result.live.is_empty() {
        if result.stale > 0 {
            return Err(ApiError::NoHealthyEndpoint(format!(
                "all {} endpoint(s) serving {} have stale advertisements",
                result.stale, path
            )));
        }
        return Err(ApiError::NotFound(format!(
            "no server is serving the requested path {}",
            path
        )));
    }

    let client = client_ip(headers).and_then(|ip| state.geo.resolve(ip));
    result.live = rank(result.live, client, &state.round_robin);

    let location = location_url(&result.live[0], &path);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::LOCATION, location.as_str().parse().unwrap());
    if let Some(link) = link_header(&result.live, &path, state.config.link_alternates) {
        if let Ok(value) = link.parse() {
            response_headers.insert(header::LINK, value);
        }
    }
    Ok((StatusCode::TEMPORARY_REDIRECT, response_headers).into_response())
}

/// Existence probe fanned out across origins
///
/// GET /api/v1.0/director/stat/<path>
pub async fn stat_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    if state.config.stat_concurrency_limit == 0 {
        return Err(ApiError::NotFound("stat fan-out is disabled".into()));
    }

    let path = format!("/{}", path.trim_start_matches('/'));
    let result = match_path(&path, &state.catalog.snapshot(), &[ServerRole::Origin]);
    if result.live.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no origin is serving the requested path {}",
            path
        )));
    }

    let semaphore = Arc::new(Semaphore::new(state.config.stat_concurrency_limit));
    let mut probes = tokio::task::JoinSet::new();
    for candidate in result.live.into_iter().take(state.config.max_stat_response) {
        let url = location_url(&candidate, &path);
        let client = state.client.clone();
        let semaphore = semaphore.clone();
        probes.spawn(async move {
            let _permit = semaphore.acquire().await.ok()?;
            let response = client.head(url.clone()).send().await.ok()?;
            response.status().is_success().then(|| url.to_string())
        });
    }

    let mut found = Vec::new();
    let deadline = tokio::time::sleep(state.config.stat_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            joined = probes.join_next() => match joined {
                Some(Ok(Some(url))) => {
                    found.push(url);
                    if found.len() >= state.config.min_stat_response {
                        break;
                    }
                }
                Some(_) => continue,
                None => break,
            }
        }
    }
    probes.abort_all();

    Ok(Json(json!({ "found": found })).into_response())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1.0/director/registerOrigin", post(register_origin))
        .route("/api/v1.0/director/registerCache", post(register_cache))
        .route("/api/v1.0/director/listNamespaces", get(list_namespaces))
        .route("/api/v1.0/director/object/{*path}", any(redirect_object))
        .route("/api/v1.0/director/origin/{*path}", get(redirect_origin))
        .route("/api/v1.0/director/stat/{*path}", get(stat_object))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Spawn the catalog janitor for this state.
pub fn spawn_janitor(state: &AppState) {
    let interval = state.config.advertisement_ttl / 4;
    let catalog = state.catalog.clone();
    let token = state.shutdown.child_token();
    info!(interval_secs = interval.as_secs(), "Starting catalog janitor");
    tokio::spawn(catalog.janitor(interval, token));
}
