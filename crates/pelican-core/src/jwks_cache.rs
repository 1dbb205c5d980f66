//! Shared JWKS cache
//!
//! JWKS fetches are read-heavy and shared between the token verifier, the
//! advertisement verifier, and the router. One cache keyed by issuer URL
//! serves them all, with a short TTL and single-flight refresh so a herd of
//! concurrent verifications triggers at most one upstream fetch.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::error::{PelicanError, Result};
use crate::keys::Jwks;

/// Default time-to-live for cached key sets.
const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Well-known path under an issuer URL where the JWKS is published.
pub const ISSUER_JWKS_PATH: &str = "/.well-known/issuer.jwks";

/// TTL-bounded cache of issuer key sets.
#[derive(Clone)]
pub struct JwksCache {
    cache: Cache<String, Arc<Jwks>>,
    client: reqwest::Client,
}

impl JwksCache {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_ttl(client, DEFAULT_TTL)
    }

    pub fn with_ttl(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).max_capacity(1024).build(),
            client,
        }
    }

    /// Fetch the key set for `issuer`, hitting the network only on a cache
    /// miss. Concurrent misses for the same issuer coalesce into one request.
    pub async fn fetch(&self, issuer: &str) -> Result<Arc<Jwks>> {
        let url = jwks_url(issuer);
        let client = self.client.clone();
        self.cache
            .try_get_with(issuer.to_string(), async move {
                debug!(issuer = %issuer_of(&url), url = %url, "Fetching JWKS");
                fetch_jwks(&client, &url).await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<PelicanError>| match e.as_ref() {
                PelicanError::NotFound(msg) => PelicanError::NotFound(msg.clone()),
                PelicanError::NotApproved(msg) => PelicanError::NotApproved(msg.clone()),
                other => PelicanError::Transient(other.to_string()),
            })
    }

    /// Fetch a key set from an explicit URL, bypassing the well-known path
    /// construction but still sharing the cache.
    pub async fn fetch_url(&self, url: &str) -> Result<Arc<Jwks>> {
        let client = self.client.clone();
        let url = url.to_string();
        self.cache
            .try_get_with(url.clone(), async move {
                fetch_jwks(&client, &url).await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<PelicanError>| match e.as_ref() {
                PelicanError::NotFound(msg) => PelicanError::NotFound(msg.clone()),
                PelicanError::NotApproved(msg) => PelicanError::NotApproved(msg.clone()),
                other => PelicanError::Transient(other.to_string()),
            })
    }

    /// Seed the cache with a known key set. Used for the server's own keys
    /// and by tests to avoid the network.
    pub async fn seed(&self, issuer: &str, jwks: Jwks) {
        self.cache.insert(issuer.to_string(), Arc::new(jwks)).await;
    }

    /// Drop a cached entry, forcing the next fetch to hit the network.
    pub async fn invalidate(&self, issuer: &str) {
        self.cache.invalidate(issuer).await;
    }
}

fn jwks_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), ISSUER_JWKS_PATH)
}

fn issuer_of(url: &str) -> &str {
    url.strip_suffix(ISSUER_JWKS_PATH).unwrap_or(url)
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> Result<Jwks> {
    let response = client.get(url).send().await?;
    match response.status() {
        status if status.is_success() => {}
        reqwest::StatusCode::NOT_FOUND => {
            return Err(PelicanError::NotFound(format!("no JWKS at {}", url)))
        }
        reqwest::StatusCode::FORBIDDEN => {
            return Err(PelicanError::NotApproved(format!(
                "JWKS at {} withheld pending approval",
                url
            )))
        }
        status => {
            return Err(PelicanError::Transient(format!(
                "JWKS fetch from {} returned {}",
                url, status
            )))
        }
    }
    response
        .json::<Jwks>()
        .await
        .map_err(|e| PelicanError::Protocol(format!("malformed JWKS from {}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IssuerKey;

    #[tokio::test]
    async fn test_seeded_fetch_skips_network() {
        let cache = JwksCache::new(reqwest::Client::new());
        let key = IssuerKey::generate();

        cache
            .seed("https://origin.example.com", key.public_jwks())
            .await;

        let jwks = cache.fetch("https://origin.example.com").await.unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some(key.kid()));
    }

    #[test]
    fn test_jwks_url_construction() {
        assert_eq!(
            jwks_url("https://reg.example.com/"),
            "https://reg.example.com/.well-known/issuer.jwks"
        );
    }
}
