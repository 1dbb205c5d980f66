//! # Pelican Registry
//!
//! The registry owns the durable namespace table of a Pelican federation:
//! which path prefixes exist, which public keys may advertise them, and
//! whether the federation administrator has approved them.
//!
//! ## API Endpoints
//!
//! - `POST /api/v1.0/registry` - Register a namespace (key-sign challenge,
//!   optional OIDC device-code identity flow)
//! - `GET /api/v1.0/registry` - List all registered namespaces
//! - `GET /api/v1.0/registry/<prefix>/.well-known/issuer.jwks` - Namespace JWKS
//! - `GET /api/v1.0/registry/<prefix>/.well-known/openid-configuration` -
//!   Issuer metadata for the namespace
//! - `POST /api/v1.0/registry/checkNamespaceExists` - Prefix/key lookup
//! - `POST /api/v1.0/registry/checkNamespaceStatus` - Approval check
//! - `DELETE /api/v1.0/registry/<prefix>` - Delete a namespace (requires a
//!   token signed by a registered key with the deletion scope)

pub mod api;
pub mod challenge;
pub mod identity;
pub mod storage;

pub use api::{create_router, AppState};
pub use challenge::NonceStore;
pub use identity::{OidcClient, OidcConfig};
pub use storage::{
    AdminMetadata, MemoryStore, Namespace, RegistrationStatus, RegistryStore, SqliteStore,
};
