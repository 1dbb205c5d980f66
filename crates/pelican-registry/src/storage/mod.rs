//! Storage abstraction for the namespace registry
//!
//! This module provides a trait-based abstraction over the durable namespace
//! table, with an in-memory backend (default, development) and a SQLite
//! backend (production). The registry is the only writer; reads may be
//! concurrent.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use pelican_core::Jwks;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Namespace not found: {0}")]
    NotFound(String),

    #[error("Namespace already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Administrator approval state of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "Pending"),
            RegistrationStatus::Approved => write!(f, "Approved"),
            RegistrationStatus::Denied => write!(f, "Denied"),
        }
    }
}

/// Transitions are admin-driven: a namespace starts Pending and moves to
/// Approved or Denied; an Approved namespace may be sent back to Pending.
pub fn validate_transition(
    from: RegistrationStatus,
    to: RegistrationStatus,
) -> Result<(), StorageError> {
    use RegistrationStatus::*;
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (Pending, Approved) | (Pending, Denied) | (Approved, Pending) => Ok(()),
        (from, to) => Err(StorageError::InvalidTransition(format!(
            "{} -> {}",
            from, to
        ))),
    }
}

/// Administrator-managed metadata attached to a namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminMetadata {
    #[serde(default)]
    pub status: RegistrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One registered namespace: a path prefix bound to the keys authorized to
/// advertise it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    /// The JWKS proven during registration
    pub pubkey: Jwks,
    /// Identity string resolved during the optional OIDC flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default)]
    pub admin_metadata: AdminMetadata,
}

/// Storage backend trait for the registry's namespace table.
///
/// Implementations must be thread-safe and support concurrent reads.
#[async_trait]
pub trait RegistryStore: Send + Sync + Debug {
    /// Insert a new namespace; fails with `AlreadyExists` on a taken prefix.
    async fn add_namespace(&self, ns: Namespace) -> Result<(), StorageError>;

    /// Fetch a namespace by exact prefix.
    async fn get_namespace(&self, prefix: &str) -> Result<Option<Namespace>, StorageError>;

    /// Whether a namespace with this exact prefix exists.
    async fn namespace_exists(&self, prefix: &str) -> Result<bool, StorageError> {
        Ok(self.get_namespace(prefix).await?.is_some())
    }

    /// Delete a namespace; returns whether anything was removed.
    async fn delete_namespace(&self, prefix: &str) -> Result<bool, StorageError>;

    /// All registered namespaces.
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StorageError>;

    /// All registered prefixes; used for key-chaining checks.
    async fn list_prefixes(&self) -> Result<Vec<String>, StorageError>;

    /// Admin-driven status update, enforcing the transition rules.
    async fn set_status(
        &self,
        prefix: &str,
        status: RegistrationStatus,
    ) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_rules() {
        use RegistrationStatus::*;
        validate_transition(Pending, Approved).unwrap();
        validate_transition(Pending, Denied).unwrap();
        validate_transition(Approved, Pending).unwrap();
        validate_transition(Denied, Denied).unwrap();

        assert!(validate_transition(Denied, Approved).is_err());
        assert!(validate_transition(Denied, Pending).is_err());
        assert!(validate_transition(Approved, Denied).is_err());
    }
}
