//! Namespace advertisements
//!
//! An advertisement is a server's signed self-description: the namespaces it
//! serves, its endpoints, and its location. Origins and caches push one to
//! the director on every advertise tick; the director holds it in its
//! catalog until the TTL lapses.
//!
//! The signature covers the canonical serialization of the envelope minus
//! the signature field: JSON with sorted keys and no whitespace.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PelicanError, Result};
use crate::keys::{IssuerKey, Jwk};

/// The role a server plays in the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Origin,
    Cache,
}

impl ServerRole {
    /// The role implied by a registered namespace prefix: `/caches/<name>`
    /// denotes a cache, anything else an origin.
    pub fn from_prefix(prefix: &str) -> ServerRole {
        if prefix.starts_with("/caches/") {
            ServerRole::Cache
        } else {
            ServerRole::Origin
        }
    }
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerRole::Origin => write!(f, "origin"),
            ServerRole::Cache => write!(f, "cache"),
        }
    }
}

/// A token issuer authorized for a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenIssuerAd {
    pub issuer_url: Url,
    pub base_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restricted_paths: Vec<String>,
}

/// One namespace served by the advertising server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceAd {
    pub prefix: String,
    pub issuers: Vec<TokenIssuerAd>,
    #[serde(default)]
    pub public_read: bool,
}

/// The unsigned advertisement envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Display name of the server; unique per role within a federation
    pub name: String,
    pub role: ServerRole,
    /// Endpoint serving object data
    pub data_url: Url,
    /// Web/API endpoint; doubles as the token issuer URL
    pub web_url: Url,
    pub namespaces: Vec<NamespaceAd>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl Advertisement {
    /// Canonical form signed by the advertiser: sorted keys, no whitespace.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        // serde_json maps are ordered by key, so a Value round-trip sorts
        // the object entries; compact printing drops the whitespace.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// Sign the envelope with the server's issuer key.
    pub fn sign(self, key: &IssuerKey) -> Result<SignedAdvertisement> {
        let signature = hex::encode(key.sign_payload(&self.canonical_bytes()?));
        Ok(SignedAdvertisement { ad: self, signature })
    }
}

/// A signed advertisement as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedAdvertisement {
    #[serde(flatten)]
    pub ad: Advertisement,
    /// Hex-encoded DER ECDSA-SHA256 signature over the canonical envelope
    pub signature: String,
}

impl SignedAdvertisement {
    /// Verify the envelope signature with one public key.
    pub fn verify_with(&self, key: &Jwk) -> Result<()> {
        let signature = hex::decode(&self.signature)
            .map_err(|e| PelicanError::InvalidSignature(format!("malformed signature: {}", e)))?;
        key.verify_payload(&self.ad.canonical_bytes()?, &signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ad() -> Advertisement {
        Advertisement {
            name: "origin-wisc".into(),
            role: ServerRole::Origin,
            data_url: Url::parse("https://origin.example.com:8443").unwrap(),
            web_url: Url::parse("https://origin.example.com:8444").unwrap(),
            namespaces: vec![NamespaceAd {
                prefix: "/foo/bar".into(),
                issuers: vec![TokenIssuerAd {
                    issuer_url: Url::parse("https://origin.example.com:8444").unwrap(),
                    base_paths: vec!["/foo/bar".into()],
                    restricted_paths: vec![],
                }],
                public_read: false,
            }],
            lat: Some(43.07),
            lon: Some(-89.4),
        }
    }

    #[test]
    fn test_canonical_bytes_sorted_and_compact() {
        let bytes = sample_ad().canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(!text.contains(' '));
        // "data_url" sorts before "name", regardless of struct field order.
        let data_pos = text.find("\"data_url\"").unwrap();
        let name_pos = text.find("\"name\"").unwrap();
        assert!(data_pos < name_pos);
    }

    #[test]
    fn test_sign_then_verify_roundtrip() {
        let key = IssuerKey::generate();
        let signed = sample_ad().sign(&key).unwrap();
        signed.verify_with(&key.public_jwk()).unwrap();
    }

    #[test]
    fn test_verify_rejects_modified_envelope() {
        let key = IssuerKey::generate();
        let mut signed = sample_ad().sign(&key).unwrap();
        signed.ad.namespaces[0].prefix = "/stolen".into();

        assert!(signed.verify_with(&key.public_jwk()).is_err());
    }

    #[test]
    fn test_verify_rejects_foreign_key() {
        let key = IssuerKey::generate();
        let other = IssuerKey::generate();
        let signed = sample_ad().sign(&key).unwrap();

        assert!(signed.verify_with(&other.public_jwk()).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let key = IssuerKey::generate();
        let signed = sample_ad().sign(&key).unwrap();
        let value = serde_json::to_value(&signed).unwrap();

        assert_eq!(value["role"], "origin");
        assert_eq!(value["namespaces"][0]["prefix"], "/foo/bar");
        assert!(value["signature"].is_string());
    }

    #[test]
    fn test_role_from_prefix() {
        assert_eq!(ServerRole::from_prefix("/caches/sdsc"), ServerRole::Cache);
        assert_eq!(ServerRole::from_prefix("/foo/bar"), ServerRole::Origin);
    }
}
