//! Capability token minting and verification
//!
//! Pelican servers grant each other scoped, short-lived access through signed
//! bearer tokens. A token is minted with the local issuer key and verified by
//! the receiving side against the issuer's published JWKS, fetched through
//! the shared [`JwksCache`].
//!
//! Scopes follow the WLCG profile: `storage.read:<path>`,
//! `storage.modify:<path>`, `storage.create:<path>`, plus Pelican-specific
//! capabilities such as `pelican.namespace_delete`.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PelicanError, Result};
use crate::jwks_cache::JwksCache;
use crate::keys::{IssuerKey, Jwks};

/// Scope granting namespace deletion at the registry.
pub const SCOPE_NAMESPACE_DELETE: &str = "pelican.namespace_delete";

/// Scope carried by advertisement requests to the director.
pub const SCOPE_ADVERTISE: &str = "pelican.advertise";

/// Clock skew tolerated during claim validation.
const CLAIM_LEEWAY: Duration = Duration::from_secs(60);

/// Token profiles bound the lifetime a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenProfile {
    /// General WLCG bearer token
    Wlcg,
    /// Monitoring probe token; deliberately very short-lived
    Monitoring,
}

impl TokenProfile {
    /// The longest lifetime this profile permits.
    pub fn max_lifetime(&self) -> Duration {
        match self {
            TokenProfile::Wlcg => Duration::from_secs(24 * 3600),
            TokenProfile::Monitoring => Duration::from_secs(60),
        }
    }

    fn wlcg_version(&self) -> &'static str {
        "1.0"
    }
}

/// Audience claim; accepts both the single-string and array JWT encodings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|a| a == audience),
        }
    }
}

/// Claims carried by a Pelican capability token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    /// Space-separated scope set
    pub scope: String,
    #[serde(rename = "wlcg.ver", skip_serializing_if = "Option::is_none")]
    pub wlcg_ver: Option<String>,
}

impl TokenClaims {
    /// The individual scopes of the token.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }
}

/// Inputs for minting one capability token.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub profile: TokenProfile,
    pub issuer: Url,
    pub audience: Vec<String>,
    pub subject: String,
    pub lifetime: Duration,
    pub scopes: Vec<String>,
}

impl TokenConfig {
    /// Mint and sign the token with the server's issuer key.
    pub fn mint(&self, key: &IssuerKey) -> Result<String> {
        if self.lifetime.is_zero() {
            return Err(PelicanError::Config("token lifetime must be positive".into()));
        }
        if self.lifetime > self.profile.max_lifetime() {
            return Err(PelicanError::Config(format!(
                "token lifetime {}s exceeds profile maximum {}s",
                self.lifetime.as_secs(),
                self.profile.max_lifetime().as_secs()
            )));
        }
        if self.audience.is_empty() {
            return Err(PelicanError::Config("token audience must not be empty".into()));
        }

        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            iss: self.issuer.as_str().trim_end_matches('/').to_string(),
            aud: Audience::Many(self.audience.clone()),
            sub: self.subject.clone(),
            iat: now,
            exp: now + self.lifetime.as_secs() as i64,
            jti: uuid::Uuid::new_v4().to_string(),
            scope: self.scopes.join(" "),
            wlcg_ver: Some(self.profile.wlcg_version().to_string()),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key.kid().to_string());

        encode(&header, &claims, &key.encoding_key()?)
            .map_err(|e| PelicanError::Internal(format!("token signing: {}", e)))
    }
}

/// Verifies capability tokens against issuer JWKS fetched through the shared
/// cache.
#[derive(Clone)]
pub struct TokenVerifier {
    jwks_cache: JwksCache,
}

impl TokenVerifier {
    pub fn new(jwks_cache: JwksCache) -> Self {
        Self { jwks_cache }
    }

    /// Verify `token`: signature against the issuer's JWKS, `iat`/`exp` with
    /// leeway, audience membership, and (when `allowed_scopes` is non-empty)
    /// at least one scope from the allow-set.
    pub async fn verify(
        &self,
        token: &str,
        expected_audience: &str,
        allowed_scopes: &[&str],
    ) -> Result<TokenClaims> {
        let issuer = peek_issuer(token)?;
        let jwks = self.jwks_cache.fetch(&issuer).await?;
        verify_with_jwks(token, &jwks, expected_audience, allowed_scopes)
    }
}

/// Verify a token against an already-obtained key set.
pub fn verify_with_jwks(
    token: &str,
    jwks: &Jwks,
    expected_audience: &str,
    allowed_scopes: &[&str],
) -> Result<TokenClaims> {
    let header = decode_header(token)
        .map_err(|e| PelicanError::Protocol(format!("malformed token header: {}", e)))?;

    let key = match header.kid.as_deref() {
        Some(kid) => jwks.find(kid).or_else(|| jwks.first()),
        None => jwks.first(),
    }
    .ok_or_else(|| PelicanError::InvalidSignature("issuer JWKS is empty".into()))?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_audience(&[expected_audience]);
    validation.leeway = CLAIM_LEEWAY.as_secs();

    let data = decode::<TokenClaims>(token, &key.decoding_key()?, &validation).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                PelicanError::TokenExpired(e.to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidAudience => PelicanError::InvalidAudience {
                expected: expected_audience.to_string(),
            },
            jsonwebtoken::errors::ErrorKind::InvalidSignature
            | jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey => {
                PelicanError::InvalidSignature(e.to_string())
            }
            _ => PelicanError::Protocol(format!("token validation: {}", e)),
        }
    })?;

    let claims = data.claims;

    // jsonwebtoken validates exp but not iat.
    let now = Utc::now().timestamp();
    if claims.iat > now + CLAIM_LEEWAY.as_secs() as i64 {
        return Err(PelicanError::TokenExpired(format!(
            "token issued in the future (iat {})",
            claims.iat
        )));
    }

    if !claims.aud.contains(expected_audience) {
        return Err(PelicanError::InvalidAudience {
            expected: expected_audience.to_string(),
        });
    }

    if !allowed_scopes.is_empty() && !allowed_scopes.iter().any(|s| claims.has_scope(s)) {
        return Err(PelicanError::InsufficientScope(format!(
            "token scope '{}' grants none of the required capabilities",
            claims.scope
        )));
    }

    Ok(claims)
}

/// Read the `iss` claim without verifying the token. The claim is only used
/// to locate the JWKS; nothing is trusted until the signature checks out.
fn peek_issuer(token: &str) -> Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| PelicanError::Protocol("malformed token".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| PelicanError::Protocol(format!("malformed token payload: {}", e)))?;

    #[derive(Deserialize)]
    struct IssuerOnly {
        iss: String,
    }
    let claims: IssuerOnly = serde_json::from_slice(&bytes)
        .map_err(|_| PelicanError::Protocol("token carries no issuer claim".into()))?;
    Ok(claims.iss)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(key_url: &str) -> TokenConfig {
        TokenConfig {
            profile: TokenProfile::Monitoring,
            issuer: Url::parse(key_url).unwrap(),
            audience: vec!["https://origin.example.com:8443".into()],
            subject: "origin".into(),
            lifetime: Duration::from_secs(60),
            scopes: vec!["storage.read:/".into(), "storage.modify:/".into()],
        }
    }

    #[test]
    fn test_mint_then_verify_roundtrip() {
        let key = IssuerKey::generate();
        let config = test_config("https://origin.example.com");

        let token = config.mint(&key).unwrap();
        let claims = verify_with_jwks(
            &token,
            &key.public_jwks(),
            "https://origin.example.com:8443",
            &[],
        )
        .unwrap();

        assert_eq!(claims.iss, "https://origin.example.com");
        assert_eq!(claims.sub, "origin");
        assert!(claims.has_scope("storage.read:/"));
        assert!(claims.has_scope("storage.modify:/"));
        assert_eq!(claims.wlcg_ver.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_verify_rejects_wrong_audience() {
        let key = IssuerKey::generate();
        let token = test_config("https://origin.example.com").mint(&key).unwrap();

        let result = verify_with_jwks(&token, &key.public_jwks(), "https://other.example.com", &[]);
        assert!(matches!(result, Err(PelicanError::InvalidAudience { .. })));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = IssuerKey::generate();
        let other = IssuerKey::generate();
        let token = test_config("https://origin.example.com").mint(&key).unwrap();

        let result = verify_with_jwks(
            &token,
            &other.public_jwks(),
            "https://origin.example.com:8443",
            &[],
        );
        assert!(matches!(result, Err(PelicanError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_requires_scope_from_allow_set() {
        let key = IssuerKey::generate();
        let token = test_config("https://origin.example.com").mint(&key).unwrap();

        verify_with_jwks(
            &token,
            &key.public_jwks(),
            "https://origin.example.com:8443",
            &["storage.read:/"],
        )
        .unwrap();

        let result = verify_with_jwks(
            &token,
            &key.public_jwks(),
            "https://origin.example.com:8443",
            &[SCOPE_NAMESPACE_DELETE],
        );
        assert!(matches!(result, Err(PelicanError::InsufficientScope(_))));
    }

    #[test]
    fn test_mint_rejects_excessive_lifetime() {
        let key = IssuerKey::generate();
        let mut config = test_config("https://origin.example.com");
        config.lifetime = Duration::from_secs(600);

        assert!(matches!(config.mint(&key), Err(PelicanError::Config(_))));
    }

    #[test]
    fn test_mint_rejects_empty_audience() {
        let key = IssuerKey::generate();
        let mut config = test_config("https://origin.example.com");
        config.audience.clear();

        assert!(matches!(config.mint(&key), Err(PelicanError::Config(_))));
    }

    #[test]
    fn test_peek_issuer() {
        let key = IssuerKey::generate();
        let token = test_config("https://origin.example.com").mint(&key).unwrap();
        assert_eq!(peek_issuer(&token).unwrap(), "https://origin.example.com");
    }
}
