//! Registration and periodic advertisement
//!
//! Every origin and cache runs this loop. On start it registers its
//! namespace with the registry, retrying forever with capped exponential
//! backoff; once registered it advertises to the director on a fixed
//! interval comfortably below the director's advertisement TTL. A failed
//! advertisement is logged and retried on the next tick; the data plane is
//! never blocked.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use pelican_core::config::{FederationConfig, OriginConfig, ServerConfig};
use pelican_core::{
    Advertisement, IssuerKey, NamespaceAd, PelicanError, Result, ServerRole, SignedAdvertisement,
    TokenIssuerAd,
};

/// Initial backoff after the first failed registration attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Fetch the namespaces currently advertised by the federation's origins.
/// Caches use this at startup to render authorization files covering the
/// public namespaces they may serve.
pub async fn fetch_director_namespaces(
    client: &reqwest::Client,
    director_url: &Url,
) -> Result<Vec<NamespaceAd>> {
    let url = format!(
        "{}/api/v1.0/director/listNamespaces",
        director_url.as_str().trim_end_matches('/')
    );
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(PelicanError::Transient(format!(
            "namespace listing returned {}",
            response.status()
        )));
    }
    response
        .json::<Vec<NamespaceAd>>()
        .await
        .map_err(|e| PelicanError::Protocol(format!("namespace listing response: {}", e)))
}

#[derive(Debug, Deserialize)]
struct CheckNamespaceExistsResponse {
    #[serde(default)]
    prefix_exists: bool,
    #[serde(default)]
    key_match: bool,
}

#[derive(Debug, Deserialize)]
struct ChallengeInitResponse {
    server_nonce: String,
    server_payload: String,
    server_signature: String,
}

/// Drives registry registration and director advertisement for one server.
pub struct Advertiser {
    client: reqwest::Client,
    federation: FederationConfig,
    server: ServerConfig,
    origin: OriginConfig,
    key: IssuerKey,
    role: ServerRole,
}

impl Advertiser {
    pub fn new(
        client: reqwest::Client,
        federation: FederationConfig,
        server: ServerConfig,
        origin: OriginConfig,
        key: IssuerKey,
        role: ServerRole,
    ) -> Self {
        Self {
            client,
            federation,
            server,
            origin,
            key,
            role,
        }
    }

    fn registry_endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/api/v1.0/registry{}",
            self.federation.registry_url.as_str().trim_end_matches('/'),
            suffix
        )
    }

    /// Build and sign this server's advertisement envelope.
    pub fn build_ad(&self) -> Result<SignedAdvertisement> {
        Advertisement {
            name: self.server.name.clone(),
            role: self.role,
            data_url: self.server.data_url.clone(),
            web_url: self.server.external_url.clone(),
            namespaces: vec![NamespaceAd {
                prefix: self.origin.namespace_prefix.clone(),
                issuers: vec![TokenIssuerAd {
                    issuer_url: self.server.external_url.clone(),
                    base_paths: vec![self.origin.namespace_prefix.clone()],
                    restricted_paths: vec![],
                }],
                public_read: self.origin.enable_public_reads,
            }],
            lat: self.server.latitude,
            lon: self.server.longitude,
        }
        .sign(&self.key)
    }

    /// Register with the registry, retrying until success or cancellation.
    /// Returns false only when cancelled.
    pub async fn register_with_retry(&self, token: &CancellationToken) -> bool {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.ensure_registered().await {
                Ok(()) => {
                    info!(prefix = %self.origin.namespace_prefix, "Namespace registration confirmed");
                    return true;
                }
                Err(err) => {
                    warn!(
                        prefix = %self.origin.namespace_prefix,
                        error = %err,
                        retry_in_secs = backoff.as_secs(),
                        "Namespace registration failed; will retry"
                    );
                }
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.origin.registration_retry_interval);
        }
    }

    /// Check whether our key is already on file; run the key-sign challenge
    /// when it is not.
    async fn ensure_registered(&self) -> Result<()> {
        let jwks = serde_json::to_string(&self.key.public_jwks())
            .map_err(|e| PelicanError::Internal(e.to_string()))?;

        let response = self
            .client
            .post(self.registry_endpoint("/checkNamespaceExists"))
            .json(&json!({
                "prefix": self.origin.namespace_prefix,
                "pubkey": jwks,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PelicanError::Transient(format!(
                "namespace existence check returned {}",
                response.status()
            )));
        }
        let check: CheckNamespaceExistsResponse = response
            .json()
            .await
            .map_err(|e| PelicanError::Protocol(format!("existence check response: {}", e)))?;

        if check.prefix_exists {
            if check.key_match {
                debug!("Prefix already registered with our key");
                return Ok(());
            }
            return Err(PelicanError::Unauthorized(format!(
                "prefix {} is registered under a different key",
                self.origin.namespace_prefix
            )));
        }

        self.run_key_sign_challenge().await
    }

    /// Client side of the registry's two-step challenge.
    async fn run_key_sign_challenge(&self) -> Result<()> {
        let client_nonce = crate::nonce();

        let response = self
            .client
            .post(self.registry_endpoint(""))
            .json(&json!({ "client_nonce": client_nonce }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PelicanError::Transient(format!(
                "challenge init returned {}",
                response.status()
            )));
        }
        let init: ChallengeInitResponse = response
            .json()
            .await
            .map_err(|e| PelicanError::Protocol(format!("challenge init response: {}", e)))?;

        let client_payload = format!("{}{}", client_nonce, init.server_nonce);
        let client_signature = hex::encode(self.key.sign_payload(client_payload.as_bytes()));

        let response = self
            .client
            .post(self.registry_endpoint(""))
            .json(&json!({
                "client_nonce": client_nonce,
                "client_payload": client_payload,
                "client_signature": client_signature,
                "server_nonce": init.server_nonce,
                "server_payload": init.server_payload,
                "server_signature": init.server_signature,
                "pubkey": self.key.public_jwks(),
                "prefix": self.origin.namespace_prefix,
            }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                info!(prefix = %self.origin.namespace_prefix, "Namespace registered");
                Ok(())
            }
            reqwest::StatusCode::FORBIDDEN => Err(PelicanError::NotApproved(
                "registration forbidden by key chaining policy".into(),
            )),
            reqwest::StatusCode::CONFLICT => Err(PelicanError::Unauthorized(format!(
                "prefix {} is registered under a different key",
                self.origin.namespace_prefix
            ))),
            status => Err(PelicanError::Transient(format!(
                "challenge commit returned {}",
                status
            ))),
        }
    }

    /// Push one advertisement to the director.
    pub async fn advertise_once(&self) -> Result<()> {
        let ad = self.build_ad()?;
        let endpoint = match self.role {
            ServerRole::Origin => "registerOrigin",
            ServerRole::Cache => "registerCache",
        };
        let url = format!(
            "{}/api/v1.0/director/{}",
            self.federation.director_url.as_str().trim_end_matches('/'),
            endpoint
        );

        let response = self.client.post(&url).json(&ad).send().await?;
        if !response.status().is_success() {
            return Err(PelicanError::Transient(format!(
                "director advertisement returned {}",
                response.status()
            )));
        }
        debug!(director = %url, "Advertisement accepted");
        Ok(())
    }

    /// Advertise on a fixed interval until cancelled.
    pub async fn advertise_loop(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.origin.advertise_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Advertiser shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.advertise_once().await {
                        warn!(error = %err, "Advertisement failed; will retry next tick");
                    }
                }
            }
        }
    }

    /// Resolve the advertise target URL; handy for logs and tests.
    pub fn director_url(&self) -> &Url {
        &self.federation.director_url
    }
}
