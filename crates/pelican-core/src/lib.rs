//! # Pelican Core
//!
//! Shared types and primitives for the Pelican federation control plane:
//!
//! - **Issuer keys**: EC P-256 key pairs persisted as JWKs, used to sign
//!   capability tokens, challenge payloads, and advertisements
//! - **Capability tokens**: short-lived scoped JWTs bound to an audience
//! - **Advertisements**: signed self-descriptions a server sends to the director
//! - **File tests**: the upload/download/delete probe cycle shared by the
//!   origin self-test and the director health prober
//! - **JWKS cache**: a shared, TTL-bounded cache of issuer key sets
//!
//! Every component receives an immutable configuration snapshot at
//! construction time; there is no process-wide configuration store.

pub mod ads;
pub mod config;
pub mod error;
pub mod filetest;
pub mod health;
pub mod jwks_cache;
pub mod keys;
pub mod shutdown;
pub mod token;

pub use ads::{Advertisement, NamespaceAd, ServerRole, SignedAdvertisement, TokenIssuerAd};
pub use error::{PelicanError, Result};
pub use filetest::{FileTest, TestType};
pub use health::{HealthMonitor, HealthStatus};
pub use jwks_cache::JwksCache;
pub use keys::{IssuerKey, Jwk, Jwks};
pub use token::{TokenClaims, TokenConfig, TokenProfile, TokenVerifier};

/// Process exit code for success.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code for a fatal, non-retryable failure.
pub const EXIT_FATAL: i32 = 1;

/// Process exit code signalling that all encountered errors are retryable.
pub const EXIT_RETRYABLE: i32 = 11;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
