//! In-memory storage backend
//!
//! Default backend for development and tests. Data is lost on restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use super::{validate_transition, Namespace, RegistrationStatus, RegistryStore, StorageError};

/// In-memory namespace store
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn add_namespace(&self, ns: Namespace) -> Result<(), StorageError> {
        let mut namespaces = self.namespaces.write().unwrap();
        if namespaces.contains_key(&ns.prefix) {
            return Err(StorageError::AlreadyExists(ns.prefix));
        }
        info!(prefix = %ns.prefix, "Registered namespace");
        namespaces.insert(ns.prefix.clone(), ns);
        Ok(())
    }

    async fn get_namespace(&self, prefix: &str) -> Result<Option<Namespace>, StorageError> {
        Ok(self.namespaces.read().unwrap().get(prefix).cloned())
    }

    async fn delete_namespace(&self, prefix: &str) -> Result<bool, StorageError> {
        let removed = self.namespaces.write().unwrap().remove(prefix).is_some();
        if removed {
            info!(prefix = %prefix, "Deleted namespace");
        }
        Ok(removed)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StorageError> {
        let mut all: Vec<Namespace> = self.namespaces.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        Ok(all)
    }

    async fn list_prefixes(&self) -> Result<Vec<String>, StorageError> {
        let mut prefixes: Vec<String> = self.namespaces.read().unwrap().keys().cloned().collect();
        prefixes.sort();
        Ok(prefixes)
    }

    async fn set_status(
        &self,
        prefix: &str,
        status: RegistrationStatus,
    ) -> Result<(), StorageError> {
        let mut namespaces = self.namespaces.write().unwrap();
        let ns = namespaces
            .get_mut(prefix)
            .ok_or_else(|| StorageError::NotFound(prefix.to_string()))?;
        validate_transition(ns.admin_metadata.status, status)?;
        info!(prefix = %prefix, status = %status, "Namespace status updated");
        ns.admin_metadata.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AdminMetadata;
    use pelican_core::IssuerKey;

    fn sample_namespace(prefix: &str) -> Namespace {
        Namespace {
            prefix: prefix.into(),
            pubkey: IssuerKey::generate().public_jwks(),
            identity: None,
            admin_metadata: AdminMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_add_get_delete() {
        let store = MemoryStore::new();
        store.add_namespace(sample_namespace("/foo")).await.unwrap();

        assert!(store.namespace_exists("/foo").await.unwrap());
        assert!(!store.namespace_exists("/bar").await.unwrap());

        assert!(store.delete_namespace("/foo").await.unwrap());
        assert!(!store.delete_namespace("/foo").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_prefix_rejected() {
        let store = MemoryStore::new();
        store.add_namespace(sample_namespace("/foo")).await.unwrap();

        let result = store.add_namespace(sample_namespace("/foo")).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = MemoryStore::new();
        store.add_namespace(sample_namespace("/foo")).await.unwrap();

        store
            .set_status("/foo", RegistrationStatus::Approved)
            .await
            .unwrap();
        let ns = store.get_namespace("/foo").await.unwrap().unwrap();
        assert_eq!(ns.admin_metadata.status, RegistrationStatus::Approved);

        // Approved may revert to Pending, but never jump to Denied.
        store
            .set_status("/foo", RegistrationStatus::Pending)
            .await
            .unwrap();
        store
            .set_status("/foo", RegistrationStatus::Denied)
            .await
            .unwrap();
        assert!(store
            .set_status("/foo", RegistrationStatus::Approved)
            .await
            .is_err());
    }
}
