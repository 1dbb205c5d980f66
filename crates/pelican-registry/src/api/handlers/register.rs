//! Namespace registration handler
//!
//! One endpoint drives the whole registration conversation: key-sign
//! challenge init and commit, plus the optional OIDC device-code identity
//! flow that piggybacks on the same route.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use pelican_core::{Jwks, PelicanError};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::challenge::challenge_payload;
use crate::identity::DevicePoll;
use crate::storage::{AdminMetadata, Namespace, RegistryStore};

/// Registration request body; which fields are present decides the step.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationData {
    pub client_nonce: String,
    pub client_payload: String,
    pub client_signature: String,

    pub server_nonce: String,
    pub server_payload: String,
    pub server_signature: String,

    pub pubkey: Option<serde_json::Value>,
    pub access_token: String,
    pub identity_required: String,
    pub device_code: String,
    pub prefix: String,
}

impl RegistrationData {
    fn has_commit_fields(&self) -> bool {
        !self.client_nonce.is_empty()
            && !self.client_payload.is_empty()
            && !self.client_signature.is_empty()
            && !self.server_nonce.is_empty()
            && !self.server_payload.is_empty()
            && !self.server_signature.is_empty()
    }
}

/// Challenge init response
#[derive(Debug, Serialize)]
pub struct ChallengeInitResponse {
    pub server_nonce: String,
    pub client_nonce: String,
    pub server_payload: String,
    pub server_signature: String,
}

/// Register a namespace
///
/// POST /api/v1.0/registry
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(data): Json<RegistrationData>,
) -> Result<Response, ApiError> {
    // An access token means the client already finished the identity flow;
    // resolve it to an identity and run the challenge with it attached.
    if !data.access_token.is_empty() {
        let oidc = state
            .oidc
            .as_ref()
            .ok_or_else(|| ApiError::BadRequest("identity flow is not configured".into()))?;
        let identity = oidc.user_info(&data.access_token).await.map_err(|e| {
            warn!(error = %e, "Failed to resolve identity from user info endpoint");
            ApiError::from(e)
        })?;
        return key_sign_challenge(&state, &data, Some(identity)).await;
    }

    if data.identity_required.is_empty() || data.identity_required == "false" {
        return key_sign_challenge(&state, &data, None).await;
    }

    // Identity required but no token yet: drive the device-code flow.
    let oidc = state
        .oidc
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("identity flow is not configured".into()))?;

    if data.device_code.is_empty() {
        debug!("Starting device authorization");
        let auth = oidc.start_device_authorization().await?;
        return Ok(Json(json!({
            "device_code": auth.device_code,
            "verification_url": auth.verification_url,
        }))
        .into_response());
    }

    debug!("Polling device authorization");
    match oidc.poll_device_token(&data.device_code).await? {
        DevicePoll::Approved { access_token } => Ok(Json(json!({
            "status": "APPROVED",
            "access_token": access_token,
        }))
        .into_response()),
        DevicePoll::Pending => Ok(Json(json!({ "status": "PENDING" })).into_response()),
    }
}

async fn key_sign_challenge(
    state: &AppState,
    data: &RegistrationData,
    identity: Option<String>,
) -> Result<Response, ApiError> {
    if data.has_commit_fields() {
        challenge_commit(state, data, identity).await
    } else if !data.client_nonce.is_empty() {
        challenge_init(state, data)
    } else {
        Err(ApiError::BadRequest(
            "registration body carries neither a client nonce nor a challenge commit".into(),
        ))
    }
}

fn challenge_init(state: &AppState, data: &RegistrationData) -> Result<Response, ApiError> {
    let server_nonce = state.nonces.issue();
    let payload = challenge_payload(&data.client_nonce, &server_nonce);
    let signature = state.key.sign_payload(&payload);

    Ok(Json(ChallengeInitResponse {
        server_nonce,
        client_nonce: data.client_nonce.clone(),
        server_payload: hex::encode(&payload),
        server_signature: hex::encode(signature),
    })
    .into_response())
}

async fn challenge_commit(
    state: &AppState,
    data: &RegistrationData,
    identity: Option<String>,
) -> Result<Response, ApiError> {
    let jwks = parse_submitted_jwks(data.pubkey.as_ref())?;
    let client_key = jwks
        .first()
        .ok_or_else(|| ApiError::BadRequest("submitted JWKS contains no keys".into()))?;

    // The registry's own signature over the echoed payload proves this
    // commit follows a genuine init rather than a replayed one.
    let server_payload = hex::decode(&data.server_payload)
        .map_err(|e| ApiError::BadRequest(format!("server payload is not hex: {}", e)))?;
    let server_signature = hex::decode(&data.server_signature)
        .map_err(|e| ApiError::BadRequest(format!("server signature is not hex: {}", e)))?;
    state
        .key
        .verify_payload(&server_payload, &server_signature)
        .map_err(|_| {
            ApiError::BadRequest("server signature does not match; restart the challenge".into())
        })?;

    if !state.nonces.consume(&data.server_nonce) {
        return Err(ApiError::BadRequest(
            "server nonce is unknown, expired, or already used; restart the challenge".into(),
        ));
    }

    let expected_payload = challenge_payload(&data.client_nonce, &data.server_nonce);
    if data.client_payload.as_bytes() != expected_payload.as_slice() {
        return Err(ApiError::BadRequest(
            "client payload does not match the nonce exchange".into(),
        ));
    }
    if server_payload != expected_payload {
        return Err(ApiError::BadRequest(
            "server payload does not match the nonce exchange".into(),
        ));
    }

    let client_signature = hex::decode(&data.client_signature)
        .map_err(|e| ApiError::BadRequest(format!("client signature is not hex: {}", e)))?;
    client_key
        .verify_payload(&expected_payload, &client_signature)
        .map_err(|_| {
            ApiError::Unauthorized("client signature does not verify with the submitted key".into())
        })?;

    // Normalize before the existence check so `/foo` and `/foo/` are the
    // same namespace.
    let prefix = validate_prefix(&data.prefix).map_err(ApiError::BadRequest)?;

    // Re-registration with a key already on file is a no-op; a different key
    // must never overwrite the original registrant.
    if let Some(existing) = state.store.get_namespace(&prefix).await? {
        if existing.pubkey.contains_key(client_key) {
            info!(prefix = %prefix, "Prefix already registered with the same key");
            return Ok(Json(json!({
                "message": format!("the prefix {} is already registered", prefix),
            }))
            .into_response());
        }
        return Err(ApiError::Conflict(format!(
            "prefix {} is registered under a different key",
            prefix
        )));
    }

    if state.config.require_key_chaining {
        validate_key_chaining(state, &prefix, &jwks).await?;
    }

    state
        .store
        .add_namespace(Namespace {
            prefix: prefix.clone(),
            pubkey: jwks,
            identity,
            admin_metadata: AdminMetadata::default(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "status": "success" }))).into_response())
}

fn parse_submitted_jwks(pubkey: Option<&serde_json::Value>) -> Result<Jwks, ApiError> {
    let value = pubkey.ok_or_else(|| ApiError::BadRequest("challenge commit has no pubkey".into()))?;
    let jwks: Jwks = serde_json::from_value(value.clone())
        .map_err(|e| ApiError::BadRequest(format!("pubkey is not a valid JWKS: {}", e)))?;
    if jwks.keys.is_empty() {
        return Err(ApiError::BadRequest("submitted JWKS contains no keys".into()));
    }
    Ok(jwks)
}

/// Syntactic prefix validation: absolute, normalized, no traversal.
pub fn validate_prefix(prefix: &str) -> Result<String, String> {
    if prefix.is_empty() {
        return Err("prefix is required".into());
    }
    if !prefix.starts_with('/') {
        return Err(format!("prefix '{}' must start with '/'", prefix));
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("prefix must name at least one path component".into());
    }
    for component in trimmed[1..].split('/') {
        if component.is_empty() {
            return Err(format!("prefix '{}' contains an empty component", prefix));
        }
        if component == "." || component == ".." {
            return Err(format!("prefix '{}' contains a traversal component", prefix));
        }
        if component.chars().any(char::is_whitespace) {
            return Err(format!("prefix '{}' contains whitespace", prefix));
        }
    }
    Ok(trimmed.to_string())
}

/// Registering a sub-prefix requires every registered ancestor to share at
/// least one key with the incoming JWKS, so the owner of the superspace is
/// provably permitting the action.
async fn validate_key_chaining(
    state: &AppState,
    prefix: &str,
    incoming: &Jwks,
) -> Result<(), ApiError> {
    for registered in state.store.list_prefixes().await? {
        if !prefix.starts_with(&format!("{}/", registered)) {
            continue;
        }
        let ancestor = state
            .store
            .get_namespace(&registered)
            .await?
            .ok_or_else(|| PelicanError::Internal(format!("prefix {} vanished", registered)))
            .map_err(ApiError::from)?;

        let shares_key = incoming
            .keys
            .iter()
            .any(|key| ancestor.pubkey.contains_key(key));
        if !shares_key {
            return Err(ApiError::Forbidden(format!(
                "key chaining: prefix {} is below {} but shares no key with it",
                prefix, registered
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix_accepts_normal_paths() {
        assert_eq!(validate_prefix("/foo").unwrap(), "/foo");
        assert_eq!(validate_prefix("/foo/bar").unwrap(), "/foo/bar");
        assert_eq!(validate_prefix("/foo/bar/").unwrap(), "/foo/bar");
        assert_eq!(validate_prefix("/caches/sdsc-cache").unwrap(), "/caches/sdsc-cache");
    }

    #[test]
    fn test_validate_prefix_rejects_bad_paths() {
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("foo").is_err());
        assert!(validate_prefix("/").is_err());
        assert!(validate_prefix("/foo//bar").is_err());
        assert!(validate_prefix("/foo/../bar").is_err());
        assert!(validate_prefix("/foo/. /bar").is_err());
    }
}
