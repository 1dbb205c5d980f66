//! Namespace lookup, status, and deletion handlers

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use pelican_core::{Jwks, ServerRole};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::storage::{Namespace, RegistrationStatus, RegistryStore};

const JWKS_SUFFIX: &str = "/.well-known/issuer.jwks";
const OPENID_SUFFIX: &str = "/.well-known/openid-configuration";

/// List all registered namespaces
///
/// GET /api/v1.0/registry
pub async fn list_namespaces(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Namespace>>, ApiError> {
    Ok(Json(state.store.list_namespaces().await?))
}

/// Serve the well-known documents nested under a namespace prefix
///
/// GET /api/v1.0/registry/<prefix>/.well-known/issuer.jwks
/// GET /api/v1.0/registry/<prefix>/.well-known/openid-configuration
pub async fn well_known(
    State(state): State<Arc<AppState>>,
    Path(wildcard): Path<String>,
) -> Result<Response, ApiError> {
    let path = format!("/{}", wildcard.trim_start_matches('/'));

    if let Some(prefix) = path.strip_suffix(JWKS_SUFFIX) {
        return namespace_jwks(&state, prefix).await;
    }
    if let Some(prefix) = path.strip_suffix(OPENID_SUFFIX) {
        return openid_configuration(&state, prefix).await;
    }
    Err(ApiError::NotFound(format!("no route for {}", path)))
}

async fn namespace_jwks(state: &AppState, prefix: &str) -> Result<Response, ApiError> {
    let ns = state
        .store
        .get_namespace(prefix)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("namespace prefix '{}' was not found", prefix)))?;

    if ns.admin_metadata.status != RegistrationStatus::Approved && approval_required(state, prefix) {
        return Err(ApiError::Forbidden(
            "the namespace has not been approved by the federation administrator".into(),
        ));
    }
    Ok(Json(ns.pubkey).into_response())
}

async fn openid_configuration(state: &AppState, prefix: &str) -> Result<Response, ApiError> {
    if !state.store.namespace_exists(prefix).await? {
        return Err(ApiError::NotFound(format!(
            "namespace prefix '{}' was not found",
            prefix
        )));
    }

    // For a prefix "/foo" the key set lives at
    // <registry>/api/v1.0/registry/foo/.well-known/issuer.jwks
    let base = state.config.external_url.as_str().trim_end_matches('/');
    let issuer = format!("{}/api/v1.0/registry{}", base, prefix);
    Ok(Json(json!({
        "issuer": issuer,
        "jwks_uri": format!("{}{}", issuer, JWKS_SUFFIX),
    }))
    .into_response())
}

fn approval_required(state: &AppState, prefix: &str) -> bool {
    match ServerRole::from_prefix(prefix) {
        ServerRole::Cache => state.config.require_cache_approval,
        ServerRole::Origin => state.config.require_origin_approval,
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckNamespaceExistsRequest {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub pubkey: String,
}

#[derive(Debug, Default, Serialize)]
pub struct CheckNamespaceExistsResponse {
    pub prefix_exists: bool,
    pub key_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Check whether a prefix is registered and whether a key matches its record
///
/// POST /api/v1.0/registry/checkNamespaceExists
///
/// Returns 200 even for unknown prefixes so callers can use 404 to detect
/// registries that predate this route.
pub async fn check_namespace_exists(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckNamespaceExistsRequest>,
) -> Result<Json<CheckNamespaceExistsResponse>, ApiError> {
    if request.prefix.is_empty() {
        return Err(ApiError::BadRequest("prefix is required".into()));
    }
    if request.pubkey.is_empty() {
        return Err(ApiError::BadRequest("pubkey is required".into()));
    }

    let submitted: Jwks = serde_json::from_str(&request.pubkey).map_err(|e| {
        ApiError::BadRequest(format!("pubkey is not a valid JWKS string: {}", e))
    })?;
    if submitted.keys.len() != 1 {
        return Err(ApiError::BadRequest(format!(
            "pubkey is a JWKS with {} keys, expected exactly one",
            submitted.keys.len()
        )));
    }
    let submitted_key = &submitted.keys[0];

    let Some(ns) = state.store.get_namespace(&request.prefix).await? else {
        return Ok(Json(CheckNamespaceExistsResponse {
            prefix_exists: false,
            key_match: false,
            message: Some("prefix was not found in the registry".into()),
        }));
    };

    let registered = match &submitted_key.kid {
        Some(kid) => ns.pubkey.find(kid),
        None => ns.pubkey.first(),
    };
    let response = match registered {
        None => CheckNamespaceExistsResponse {
            prefix_exists: true,
            key_match: false,
            message: Some("the given key is not present in the registered JWKS".into()),
        },
        Some(key) if key.public_eq(submitted_key) => CheckNamespaceExistsResponse {
            prefix_exists: true,
            key_match: true,
            message: None,
        },
        Some(_) => CheckNamespaceExistsResponse {
            prefix_exists: true,
            key_match: false,
            message: Some("the given key does not equal the registered key".into()),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CheckStatusRequest {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Serialize)]
pub struct CheckStatusResponse {
    pub approved: bool,
}

/// Report whether a namespace is cleared to operate
///
/// POST /api/v1.0/registry/checkNamespaceStatus
pub async fn check_namespace_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckStatusRequest>,
) -> Result<Json<CheckStatusResponse>, ApiError> {
    if request.prefix.is_empty() {
        return Err(ApiError::BadRequest("prefix is required".into()));
    }
    let ns = state
        .store
        .get_namespace(&request.prefix)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("namespace prefix '{}' was not found", request.prefix))
        })?;

    let approved = if approval_required(&state, &request.prefix) {
        ns.admin_metadata.status == RegistrationStatus::Approved
    } else {
        true
    };
    Ok(Json(CheckStatusResponse { approved }))
}

/// Claims required of a namespace deletion token. The token is verified
/// against the namespace's own stored JWKS, tying deletion authority back to
/// the original registrant; audience is not constrained.
#[derive(Debug, Deserialize)]
struct DeleteClaims {
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    scope: String,
}

/// Delete a namespace
///
/// DELETE /api/v1.0/registry/<prefix>
pub async fn delete_namespace(
    State(state): State<Arc<AppState>>,
    Path(wildcard): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let prefix = format!("/{}", wildcard.trim_start_matches('/'));
    debug!(prefix = %prefix, "Namespace deletion requested");

    let ns = state.store.get_namespace(&prefix).await?.ok_or_else(|| {
        ApiError::BadRequest(format!("the prefix {} does not exist so it cannot be deleted", prefix))
    })?;

    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("a bearer token is required for deletion".into()))?;
    verify_deletion_token(token, &ns.pubkey)?;

    state.store.delete_namespace(&prefix).await?;
    Ok(Json(json!({ "status": "success" })).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn verify_deletion_token(token: &str, jwks: &Jwks) -> Result<(), ApiError> {
    let header = decode_header(token)
        .map_err(|e| ApiError::Unauthorized(format!("malformed deletion token: {}", e)))?;
    let key = match header.kid.as_deref() {
        Some(kid) => jwks.find(kid).or_else(|| jwks.first()),
        None => jwks.first(),
    }
    .ok_or_else(|| ApiError::Internal("stored JWKS has no keys".into()))?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_aud = false;
    validation.leeway = 60;

    let data = decode::<DeleteClaims>(
        token,
        &key.decoding_key().map_err(ApiError::from)?,
        &validation,
    )
    .map_err(|e| {
        warn!(error = %e, "Deletion token failed verification");
        ApiError::Unauthorized("deletion token does not verify against the registered keys".into())
    })?;

    if let Some(iat) = data.claims.iat {
        if iat > Utc::now().timestamp() + 60 {
            return Err(ApiError::Unauthorized("deletion token issued in the future".into()));
        }
    }

    if !data
        .claims
        .scope
        .split_whitespace()
        .any(|s| s == pelican_core::token::SCOPE_NAMESPACE_DELETE)
    {
        return Err(ApiError::Forbidden(
            "token does not carry namespace deletion authorization".into(),
        ));
    }
    Ok(())
}
