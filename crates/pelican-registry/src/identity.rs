//! OIDC device-code identity flow
//!
//! Registration can optionally bind a namespace to a human identity. The
//! registry drives an OAuth2 device-authorization flow against the
//! federation's identity provider and resolves the final access token to an
//! identity string via the user-info endpoint.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use pelican_core::{PelicanError, Result};

/// Identity-provider endpoints and client credentials.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub device_auth_endpoint: Url,
    pub token_endpoint: Url,
    pub user_info_endpoint: Url,
}

/// Response to a device-authorization start.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub verification_url: String,
}

/// Outcome of polling the token endpoint with a device code.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    Approved { access_token: String },
    Pending,
}

#[derive(Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    verification_uri_complete: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    error: String,
}

/// Client for the federation's identity provider.
#[derive(Debug, Clone)]
pub struct OidcClient {
    config: OidcConfig,
    client: reqwest::Client,
}

impl OidcClient {
    pub fn new(config: OidcConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Resolve an access token to the identity string reported by the
    /// provider's user-info endpoint.
    pub async fn user_info(&self, access_token: &str) -> Result<String> {
        let response = self
            .client
            .post(self.config.user_info_endpoint.clone())
            .form(&[("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PelicanError::Transient(format!(
                "user info endpoint returned {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }

    /// Kick off the device-authorization flow.
    pub async fn start_device_authorization(&self) -> Result<DeviceAuthorization> {
        debug!("Requesting device code from identity provider");
        let scope = self.config.scopes.join(" ");
        let response = self
            .client
            .post(self.config.device_auth_endpoint.clone())
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PelicanError::Transient(format!(
                "device auth endpoint returned {}",
                response.status()
            )));
        }

        let body: DeviceAuthResponse = response
            .json()
            .await
            .map_err(|e| PelicanError::Protocol(format!("device auth response: {}", e)))?;
        Ok(DeviceAuthorization {
            device_code: body.device_code,
            verification_url: body.verification_uri_complete,
        })
    }

    /// Poll the token endpoint for a pending device authorization.
    ///
    /// `authorization_pending` is the one non-success answer that keeps the
    /// flow alive; every other error is fatal to this registration attempt.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll> {
        debug!("Polling token endpoint for device code");
        let response = self
            .client
            .post(self.config.token_endpoint.clone())
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::BAD_REQUEST {
            return Err(PelicanError::Transient(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PelicanError::Protocol(format!("token response: {}", e)))?;

        if !body.access_token.is_empty() {
            return Ok(DevicePoll::Approved {
                access_token: body.access_token,
            });
        }
        if status == reqwest::StatusCode::BAD_REQUEST && body.error == "authorization_pending" {
            return Ok(DevicePoll::Pending);
        }
        Err(PelicanError::Protocol(format!(
            "token endpoint refused device code: {}",
            body.error
        )))
    }
}
