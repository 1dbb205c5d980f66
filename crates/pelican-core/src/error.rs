//! Error types for the Pelican control plane

use thiserror::Error;

/// Result type alias using PelicanError
pub type Result<T> = std::result::Result<T, PelicanError>;

/// Errors that can occur across the Pelican control plane
#[derive(Error, Debug)]
pub enum PelicanError {
    /// Invalid or missing configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token has expired or is not yet valid
    #[error("Token expired: {0}")]
    TokenExpired(String),

    /// Signature verification failed
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Token audience does not include the verifier
    #[error("Invalid audience: expected '{expected}'")]
    InvalidAudience { expected: String },

    /// Token lacks a required scope
    #[error("Insufficient scope: {0}")]
    InsufficientScope(String),

    /// Other authorization failure
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transient network failure against a peer; retryable
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Malformed payload, missing field, or nonce mismatch
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Unknown prefix or object
    #[error("Not found: {0}")]
    NotFound(String),

    /// Namespace not approved by the federation administrator
    #[error("Not approved: {0}")]
    NotApproved(String),

    /// Database failure or unexpected internal condition
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PelicanError {
    /// Whether a caller-side retry is reasonable for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PelicanError::Transient(_))
    }
}

impl From<reqwest::Error> for PelicanError {
    fn from(err: reqwest::Error) -> Self {
        PelicanError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for PelicanError {
    fn from(err: serde_json::Error) -> Self {
        PelicanError::Protocol(format!("serialization: {}", err))
    }
}

impl From<url::ParseError> for PelicanError {
    fn from(err: url::ParseError) -> Self {
        PelicanError::Config(format!("unparseable URL: {}", err))
    }
}

impl From<std::io::Error> for PelicanError {
    fn from(err: std::io::Error) -> Self {
        PelicanError::Internal(err.to_string())
    }
}
