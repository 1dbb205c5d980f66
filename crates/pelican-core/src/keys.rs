//! Issuer key management
//!
//! Every Pelican server carries one EC P-256 key pair, persisted as a private
//! JWK at `<config dir>/issuer.jwk`. The key signs capability tokens (ES256),
//! registry challenge payloads, and director advertisements; the public half
//! is published as a JWKS at `<issuer>/.well-known/issuer.jwks`.
//!
//! Key types:
//! - `IssuerKey`: the server's P-256 key pair
//! - `Jwk` / `Jwks`: serializable (sets of) public or private JSON Web Keys

use std::fs;
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use p256::{EncodedPoint, FieldBytes, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{PelicanError, Result};

/// A single JSON Web Key. Only EC P-256 keys are produced by Pelican servers;
/// `d` is present for the private form and omitted from published key sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type; always "EC" for Pelican-issued keys
    pub kty: String,

    /// Curve; always "P-256" for Pelican-issued keys
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Key identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended algorithm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Key use ("sig")
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// EC x coordinate, base64url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate, base64url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// EC private scalar, base64url; only present in the on-disk private JWK
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

impl Jwk {
    /// The public portion of this key, suitable for publication.
    pub fn public(&self) -> Jwk {
        Jwk {
            d: None,
            ..self.clone()
        }
    }

    /// Canonical public-key equality: two keys match when their key type,
    /// curve, and coordinates agree. Key IDs and metadata are ignored.
    pub fn public_eq(&self, other: &Jwk) -> bool {
        self.kty == other.kty && self.crv == other.crv && self.x == other.x && self.y == other.y
    }

    fn coordinate(&self, name: &str, value: &Option<String>) -> Result<FieldBytes> {
        let encoded = value
            .as_ref()
            .ok_or_else(|| PelicanError::Protocol(format!("JWK missing EC {} coordinate", name)))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| PelicanError::Protocol(format!("JWK {} coordinate: {}", name, e)))?;
        if bytes.len() != 32 {
            return Err(PelicanError::Protocol(format!(
                "JWK {} coordinate has {} bytes, expected 32",
                name,
                bytes.len()
            )));
        }
        Ok(FieldBytes::clone_from_slice(&bytes))
    }

    /// Reconstruct the P-256 verifying key from the JWK coordinates.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        if self.kty != "EC" {
            return Err(PelicanError::Protocol(format!(
                "unsupported key type '{}'",
                self.kty
            )));
        }
        let x = self.coordinate("x", &self.x)?;
        let y = self.coordinate("y", &self.y)?;
        let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
        VerifyingKey::from_encoded_point(&point)
            .map_err(|e| PelicanError::Protocol(format!("invalid EC public key: {}", e)))
    }

    /// Verify a DER-encoded ECDSA-SHA256 signature over `payload`.
    pub fn verify_payload(&self, payload: &[u8], signature_der: &[u8]) -> Result<()> {
        let key = self.verifying_key()?;
        let signature = Signature::from_der(signature_der)
            .map_err(|e| PelicanError::InvalidSignature(format!("malformed signature: {}", e)))?;
        key.verify(payload, &signature)
            .map_err(|e| PelicanError::InvalidSignature(e.to_string()))
    }

    /// A decoding key for ES256 JWT verification.
    pub fn decoding_key(&self) -> Result<jsonwebtoken::DecodingKey> {
        let x = self
            .x
            .as_ref()
            .ok_or_else(|| PelicanError::Protocol("JWK missing EC x coordinate".into()))?;
        let y = self
            .y
            .as_ref()
            .ok_or_else(|| PelicanError::Protocol("JWK missing EC y coordinate".into()))?;
        jsonwebtoken::DecodingKey::from_ec_components(x, y)
            .map_err(|e| PelicanError::Protocol(format!("invalid EC components: {}", e)))
    }
}

/// A JSON Web Key Set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// The first key of the set, if any. Challenge commits sign with the
    /// first key of the submitted JWKS.
    pub fn first(&self) -> Option<&Jwk> {
        self.keys.first()
    }

    /// Find a key by its key ID.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Whether any key in this set is publicly equal to `key`.
    pub fn contains_key(&self, key: &Jwk) -> bool {
        self.keys.iter().any(|k| k.public_eq(key))
    }
}

/// The server's P-256 issuer key pair
#[derive(Clone)]
pub struct IssuerKey {
    kid: String,
    secret: SecretKey,
}

impl std::fmt::Debug for IssuerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerKey")
            .field("kid", &self.kid)
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl IssuerKey {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let kid = derive_kid(&secret);
        Self { kid, secret }
    }

    /// Load the issuer key from `path`, generating and persisting one if the
    /// file does not exist. A generated key is written to a sibling temp file
    /// with mode 0600 and renamed into place; `daemon_gid`, when set, becomes
    /// the file's group so the data-plane daemon can read it.
    pub fn load_or_generate(path: &Path, daemon_gid: Option<u32>) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let jwk: Jwk = serde_json::from_str(&contents).map_err(|e| {
                    PelicanError::Config(format!("unparseable issuer key {}: {}", path.display(), e))
                })?;
                Self::from_jwk(&jwk)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let key = Self::generate();
                key.persist(path, daemon_gid)?;
                info!(kid = %key.kid, path = %path.display(), "Generated new issuer key");
                Ok(key)
            }
            Err(err) => Err(PelicanError::Config(format!(
                "cannot read issuer key {}: {}",
                path.display(),
                err
            ))),
        }
    }

    /// Reconstruct a key pair from a private JWK.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let d = jwk
            .d
            .as_ref()
            .ok_or_else(|| PelicanError::Config("issuer JWK has no private scalar".into()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(d)
            .map_err(|e| PelicanError::Config(format!("issuer JWK private scalar: {}", e)))?;
        if bytes.len() != 32 {
            return Err(PelicanError::Config(format!(
                "issuer JWK private scalar has {} bytes, expected 32",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_bytes(&FieldBytes::clone_from_slice(&bytes))
            .map_err(|e| PelicanError::Config(format!("invalid issuer key: {}", e)))?;
        let kid = match &jwk.kid {
            Some(kid) => kid.clone(),
            None => derive_kid(&secret),
        };
        Ok(Self { kid, secret })
    }

    fn persist(&self, path: &Path, daemon_gid: Option<u32>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("jwk.tmp");
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            let contents = serde_json::to_string(&self.private_jwk())
                .map_err(|e| PelicanError::Internal(e.to_string()))?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        #[cfg(unix)]
        if let Some(gid) = daemon_gid {
            std::os::unix::fs::chown(&tmp, None, Some(gid))?;
        }
        #[cfg(not(unix))]
        let _ = daemon_gid;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// The key identifier.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The private JWK, as persisted on disk.
    pub fn private_jwk(&self) -> Jwk {
        let mut jwk = self.public_jwk();
        jwk.d = Some(URL_SAFE_NO_PAD.encode(self.secret.to_bytes()));
        jwk
    }

    /// The public JWK.
    pub fn public_jwk(&self) -> Jwk {
        let point = self.secret.public_key().to_encoded_point(false);
        Jwk {
            kty: "EC".into(),
            crv: Some("P-256".into()),
            kid: Some(self.kid.clone()),
            alg: Some("ES256".into()),
            key_use: Some("sig".into()),
            x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
            y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
            d: None,
        }
    }

    /// The published key set containing this key's public half.
    pub fn public_jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.public_jwk()],
        }
    }

    /// An encoding key for ES256 JWT signing.
    pub fn encoding_key(&self) -> Result<jsonwebtoken::EncodingKey> {
        let pem = self
            .secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| PelicanError::Internal(format!("PEM-encode issuer key: {}", e)))?;
        jsonwebtoken::EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| PelicanError::Internal(format!("load issuer key for signing: {}", e)))
    }

    /// Sign `payload` with ECDSA-SHA256; returns the DER-encoded signature.
    pub fn sign_payload(&self, payload: &[u8]) -> Vec<u8> {
        let signing = SigningKey::from(&self.secret);
        let signature: Signature = signing.sign(payload);
        signature.to_der().as_bytes().to_vec()
    }

    /// Verify a DER-encoded ECDSA-SHA256 signature against this key's public half.
    pub fn verify_payload(&self, payload: &[u8], signature_der: &[u8]) -> Result<()> {
        self.public_jwk().verify_payload(payload, signature_der)
    }
}

/// Key IDs are the base64url SHA-256 of the uncompressed public point.
fn derive_kid(secret: &SecretKey) -> String {
    let point = secret.public_key().to_encoded_point(false);
    URL_SAFE_NO_PAD.encode(Sha256::digest(point.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_sign_roundtrip() {
        let key = IssuerKey::generate();
        let payload = b"nonce-a.nonce-b";

        let signature = key.sign_payload(payload);
        key.verify_payload(payload, &signature).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = IssuerKey::generate();
        let other = IssuerKey::generate();

        let signature = key.sign_payload(b"payload");
        let result = other.public_jwk().verify_payload(b"payload", &signature);
        assert!(matches!(result, Err(PelicanError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let key = IssuerKey::generate();
        let signature = key.sign_payload(b"payload");
        assert!(key.verify_payload(b"payl0ad", &signature).is_err());
    }

    #[test]
    fn test_private_jwk_roundtrip() {
        let key = IssuerKey::generate();
        let restored = IssuerKey::from_jwk(&key.private_jwk()).unwrap();

        assert_eq!(restored.kid(), key.kid());
        let signature = restored.sign_payload(b"data");
        key.verify_payload(b"data", &signature).unwrap();
    }

    #[test]
    fn test_load_or_generate_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.jwk");

        let first = IssuerKey::load_or_generate(&path, None).unwrap();
        assert!(path.exists());

        let second = IssuerKey::load_or_generate(&path, None).unwrap();
        assert_eq!(first.kid(), second.kid());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_public_jwk_has_no_private_scalar() {
        let key = IssuerKey::generate();
        let jwk = key.public_jwk();
        assert!(jwk.d.is_none());
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
    }

    #[test]
    fn test_public_eq_ignores_metadata() {
        let key = IssuerKey::generate();
        let mut a = key.public_jwk();
        let b = key.public_jwk();
        a.kid = Some("renamed".into());
        a.alg = None;
        assert!(a.public_eq(&b));

        let other = IssuerKey::generate().public_jwk();
        assert!(!a.public_eq(&other));
    }
}
