//! SQLite storage backend
//!
//! Durable namespace table backed by SQLite in WAL mode. The registry is a
//! single process with serialized writes; the connection sits behind a mutex
//! and statements finish without suspension points, so the lock is only ever
//! held briefly.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{
    validate_transition, AdminMetadata, Namespace, RegistrationStatus, RegistryStore, StorageError,
};

/// Busy timeout applied to the connection.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite-backed namespace store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let connection = Connection::open(path)
            .map_err(|e| StorageError::Database(format!("open {}: {}", path.display(), e)))?;
        Self::initialize(connection)
    }

    /// An in-memory database; used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let connection =
            Connection::open_in_memory().map_err(|e| StorageError::Database(e.to_string()))?;
        Self::initialize(connection)
    }

    fn initialize(connection: Connection) -> Result<Self, StorageError> {
        connection
            .busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
            .and_then(|_| {
                // journal_mode is a row-returning pragma
                connection.pragma_update_and_check(None, "journal_mode", "wal", |_| Ok(()))
            })
            .and_then(|_| connection.pragma_update(None, "synchronous", "normal"))
            .map_err(|e| StorageError::Database(format!("pragma: {}", e)))?;

        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS namespace (
                    prefix TEXT PRIMARY KEY NOT NULL,
                    pubkey TEXT NOT NULL,
                    identity TEXT,
                    admin_metadata TEXT NOT NULL
                )",
                [],
            )
            .map_err(|e| StorageError::Database(format!("schema: {}", e)))?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn row_to_namespace(
        prefix: String,
        pubkey: String,
        identity: Option<String>,
        admin_metadata: String,
    ) -> Result<Namespace, StorageError> {
        Ok(Namespace {
            prefix,
            pubkey: serde_json::from_str(&pubkey)
                .map_err(|e| StorageError::Serialization(format!("pubkey column: {}", e)))?,
            identity,
            admin_metadata: serde_json::from_str::<AdminMetadata>(&admin_metadata)
                .map_err(|e| StorageError::Serialization(format!("admin_metadata column: {}", e)))?,
        })
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn add_namespace(&self, ns: Namespace) -> Result<(), StorageError> {
        let pubkey = serde_json::to_string(&ns.pubkey)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let admin_metadata = serde_json::to_string(&ns.admin_metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let connection = self.connection.lock().unwrap();
        let result = connection.execute(
            "INSERT INTO namespace (prefix, pubkey, identity, admin_metadata)
             VALUES (?1, ?2, ?3, ?4)",
            params![ns.prefix, pubkey, ns.identity, admin_metadata],
        );
        match result {
            Ok(_) => {
                info!(prefix = %ns.prefix, "Registered namespace");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(ns.prefix))
            }
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    async fn get_namespace(&self, prefix: &str) -> Result<Option<Namespace>, StorageError> {
        let connection = self.connection.lock().unwrap();
        let row = connection
            .query_row(
                "SELECT prefix, pubkey, identity, admin_metadata FROM namespace WHERE prefix = ?1",
                params![prefix],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|(prefix, pubkey, identity, admin_metadata)| {
            Self::row_to_namespace(prefix, pubkey, identity, admin_metadata)
        })
        .transpose()
    }

    async fn delete_namespace(&self, prefix: &str) -> Result<bool, StorageError> {
        let connection = self.connection.lock().unwrap();
        let changed = connection
            .execute("DELETE FROM namespace WHERE prefix = ?1", params![prefix])
            .map_err(|e| StorageError::Database(e.to_string()))?;
        if changed > 0 {
            info!(prefix = %prefix, "Deleted namespace");
        }
        Ok(changed > 0)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StorageError> {
        let connection = self.connection.lock().unwrap();
        let mut statement = connection
            .prepare(
                "SELECT prefix, pubkey, identity, admin_metadata FROM namespace ORDER BY prefix",
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut namespaces = Vec::new();
        for row in rows {
            let (prefix, pubkey, identity, admin_metadata) =
                row.map_err(|e| StorageError::Database(e.to_string()))?;
            namespaces.push(Self::row_to_namespace(
                prefix,
                pubkey,
                identity,
                admin_metadata,
            )?);
        }
        Ok(namespaces)
    }

    async fn list_prefixes(&self) -> Result<Vec<String>, StorageError> {
        let connection = self.connection.lock().unwrap();
        let mut statement = connection
            .prepare("SELECT prefix FROM namespace ORDER BY prefix")
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn set_status(
        &self,
        prefix: &str,
        status: RegistrationStatus,
    ) -> Result<(), StorageError> {
        let current = self
            .get_namespace(prefix)
            .await?
            .ok_or_else(|| StorageError::NotFound(prefix.to_string()))?;
        validate_transition(current.admin_metadata.status, status)?;

        let mut admin_metadata = current.admin_metadata;
        admin_metadata.status = status;
        let encoded = serde_json::to_string(&admin_metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let connection = self.connection.lock().unwrap();
        connection
            .execute(
                "UPDATE namespace SET admin_metadata = ?1 WHERE prefix = ?2",
                params![encoded, prefix],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        info!(prefix = %prefix, status = %status, "Namespace status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelican_core::IssuerKey;

    fn sample_namespace(prefix: &str) -> Namespace {
        Namespace {
            prefix: prefix.into(),
            pubkey: IssuerKey::generate().public_jwks(),
            identity: Some("https://idp.example.com/alice".into()),
            admin_metadata: AdminMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_keys_and_identity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ns = sample_namespace("/foo/bar");
        let kid = ns.pubkey.keys[0].kid.clone();
        store.add_namespace(ns).await.unwrap();

        let loaded = store.get_namespace("/foo/bar").await.unwrap().unwrap();
        assert_eq!(loaded.pubkey.keys[0].kid, kid);
        assert_eq!(loaded.identity.as_deref(), Some("https://idp.example.com/alice"));
        assert_eq!(loaded.admin_metadata.status, RegistrationStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_prefix_is_constraint_violation() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_namespace(sample_namespace("/foo"))
            .await
            .unwrap();
        let result = store.add_namespace(sample_namespace("/foo")).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .add_namespace(sample_namespace("/durable"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.namespace_exists("/durable").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_prefixes_sorted() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_namespace(sample_namespace("/b")).await.unwrap();
        store.add_namespace(sample_namespace("/a")).await.unwrap();

        assert_eq!(store.list_prefixes().await.unwrap(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_status_transition_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_namespace(sample_namespace("/foo")).await.unwrap();

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
