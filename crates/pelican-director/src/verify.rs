//! Advertisement verification
//!
//! Before an advertisement enters the catalog, its signature must verify
//! against the registry-served JWKS of every namespace it claims. That both
//! authenticates the envelope and restricts the namespace set to prefixes
//! the signing key is actually authorized for.

use tracing::{debug, warn};
use url::Url;

use pelican_core::{JwksCache, PelicanError, Result, SignedAdvertisement};

/// Verifies advertisement envelopes against registry key material.
#[derive(Clone)]
pub struct AdVerifier {
    jwks_cache: JwksCache,
    registry_url: Url,
    /// Degraded mode: accept namespaces the registry does not know
    accept_unregistered: bool,
}

impl AdVerifier {
    pub fn new(jwks_cache: JwksCache, registry_url: Url, accept_unregistered: bool) -> Self {
        Self {
            jwks_cache,
            registry_url,
            accept_unregistered,
        }
    }

    /// The registry URL serving key material for `prefix`.
    fn prefix_jwks_url(&self, prefix: &str) -> String {
        format!(
            "{}/api/v1.0/registry{}/.well-known/issuer.jwks",
            self.registry_url.as_str().trim_end_matches('/'),
            prefix
        )
    }

    /// Check the envelope against every claimed namespace.
    pub async fn verify(&self, ad: &SignedAdvertisement) -> Result<()> {
        if ad.ad.namespaces.is_empty() {
            return Err(PelicanError::Protocol(
                "advertisement claims no namespaces".into(),
            ));
        }

        for namespace in &ad.ad.namespaces {
            let url = self.prefix_jwks_url(&namespace.prefix);
            let jwks = match self.jwks_cache.fetch_url(&url).await {
                Ok(jwks) => jwks,
                Err(PelicanError::NotFound(_)) | Err(PelicanError::NotApproved(_))
                    if self.accept_unregistered =>
                {
                    debug!(
                        prefix = %namespace.prefix,
                        "Accepting unregistered namespace in degraded mode"
                    );
                    continue;
                }
                Err(PelicanError::NotFound(_)) => {
                    return Err(PelicanError::Unauthorized(format!(
                        "namespace {} is not registered",
                        namespace.prefix
                    )));
                }
                Err(PelicanError::NotApproved(msg)) => {
                    return Err(PelicanError::NotApproved(msg));
                }
                Err(err) => {
                    warn!(prefix = %namespace.prefix, error = %err, "JWKS fetch failed");
                    return Err(err);
                }
            };

            let verified = jwks.keys.iter().any(|key| ad.verify_with(key).is_ok());
            if !verified {
                return Err(PelicanError::InvalidSignature(format!(
                    "advertisement signature does not verify with any key registered for {}",
                    namespace.prefix
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelican_core::{Advertisement, IssuerKey, NamespaceAd, ServerRole};

    fn verifier(accept_unregistered: bool) -> AdVerifier {
        AdVerifier::new(
            JwksCache::new(reqwest::Client::new()),
            Url::parse("https://registry.example.com").unwrap(),
            accept_unregistered,
        )
    }

    fn signed_ad(key: &IssuerKey, prefix: &str) -> SignedAdvertisement {
        Advertisement {
            name: "o1".into(),
            role: ServerRole::Origin,
            data_url: Url::parse("https://data.example.com:8443").unwrap(),
            web_url: Url::parse("https://web.example.com:8444").unwrap(),
            namespaces: vec![NamespaceAd {
                prefix: prefix.into(),
                issuers: vec![],
                public_read: false,
            }],
            lat: None,
            lon: None,
        }
        .sign(key)
        .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_ad_signed_by_registered_key() {
        let key = IssuerKey::generate();
        let verifier = verifier(false);
        verifier
            .jwks_cache
            .seed(&verifier.prefix_jwks_url("/foo"), key.public_jwks())
            .await;

        verifier.verify(&signed_ad(&key, "/foo")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_ad_signed_by_unauthorized_key() {
        let registered = IssuerKey::generate();
        let interloper = IssuerKey::generate();
        let verifier = verifier(false);
        verifier
            .jwks_cache
            .seed(&verifier.prefix_jwks_url("/foo"), registered.public_jwks())
            .await;

        let result = verifier.verify(&signed_ad(&interloper, "/foo")).await;
        assert!(matches!(result, Err(PelicanError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_rejects_empty_namespace_set() {
        let key = IssuerKey::generate();
        let mut ad = signed_ad(&key, "/foo");
        ad.ad.namespaces.clear();

        let result = verifier(false).verify(&ad).await;
        assert!(matches!(result, Err(PelicanError::Protocol(_))));
    }

    #[test]
    fn test_prefix_jwks_url_shape() {
        assert_eq!(
            verifier(false).prefix_jwks_url("/foo/bar"),
            "https://registry.example.com/api/v1.0/registry/foo/bar/.well-known/issuer.jwks"
        );
    }
}
