//! Advertisement catalog
//!
//! The catalog is the director's in-memory, TTL-bounded view of the live
//! federation: one entry per (role, server name), replaced atomically on
//! every accepted advertisement.
//!
//! The health-suite handle for an origin lives inside its catalog entry,
//! under the same lock as upsert and eviction, so cancel-and-restart is
//! atomic: there is never more than one suite per identity, and a suite
//! never outlives its entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pelican_core::{Advertisement, ServerRole, SignedAdvertisement};

use crate::metrics;

/// Unique key of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    pub role: ServerRole,
    pub name: String,
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.role, self.name)
    }
}

impl ServerIdentity {
    pub fn of(ad: &Advertisement) -> Self {
        Self {
            role: ad.role,
            name: ad.name.clone(),
        }
    }
}

/// Cancellation handle of one health test suite.
///
/// Cancelling is idempotent; the active-suite gauge is decremented exactly
/// once, at cancel time rather than at task exit, so the gauge never
/// double-counts during a cancel-and-restart.
#[derive(Debug)]
pub struct SuiteHandle {
    token: CancellationToken,
    server_name: String,
    cancelled: AtomicBool,
}

impl SuiteHandle {
    pub fn new(token: CancellationToken, server_name: String) -> Self {
        metrics::ACTIVE_TEST_SUITES
            .with_label_values(&[&server_name])
            .inc();
        Self {
            token,
            server_name,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.token.cancel();
            metrics::ACTIVE_TEST_SUITES
                .with_label_values(&[&self.server_name])
                .dec();
        }
    }
}

impl Drop for SuiteHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Entry {
    ad: SignedAdvertisement,
    inserted_at: Instant,
    suite: Option<SuiteHandle>,
}

/// A point-in-time view of one catalog entry.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub identity: ServerIdentity,
    pub ad: Advertisement,
    /// False once the TTL has elapsed
    pub live: bool,
}

/// TTL-bounded map of live advertisements.
pub struct Catalog {
    inner: RwLock<HashMap<ServerIdentity, Entry>>,
    ttl: Duration,
}

impl Catalog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or replace the entry for the advertisement's identity.
    ///
    /// `make_suite` runs under the catalog lock after the previous suite (if
    /// any) is cancelled, so at most one suite per identity ever exists and
    /// the suite-free window is bounded by this critical section.
    pub fn upsert(
        &self,
        ad: SignedAdvertisement,
        make_suite: impl FnOnce(&ServerIdentity) -> Option<SuiteHandle>,
    ) -> ServerIdentity {
        let identity = ServerIdentity::of(&ad.ad);
        let mut inner = self.inner.write().unwrap();

        if let Some(previous) = inner.remove(&identity) {
            if let Some(suite) = previous.suite {
                debug!(identity = %identity, "Cancelling health suite for replaced entry");
                suite.cancel();
            }
        } else {
            info!(identity = %identity, "New server advertisement accepted");
        }

        let suite = make_suite(&identity);
        inner.insert(
            identity.clone(),
            Entry {
                ad,
                inserted_at: Instant::now(),
                suite,
            },
        );
        identity
    }

    /// Remove one entry, cancelling its suite.
    pub fn remove(&self, identity: &ServerIdentity) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.remove(identity) {
            Some(entry) => {
                if let Some(suite) = entry.suite {
                    suite.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Snapshots of every entry, marking whether each is still live.
    /// Routing must ignore entries whose TTL has elapsed.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let inner = self.inner.read().unwrap();
        inner
            .iter()
            .map(|(identity, entry)| EntrySnapshot {
                identity: identity.clone(),
                ad: entry.ad.ad.clone(),
                live: entry.inserted_at.elapsed() < self.ttl,
            })
            .collect()
    }

    /// Whether a live entry exists for `identity`.
    pub fn contains_live(&self, identity: &ServerIdentity) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .get(identity)
            .map(|entry| entry.inserted_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Reclaim expired entries and cancel their suites. Returns how many
    /// entries were evicted.
    pub fn evict_expired(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        let expired: Vec<ServerIdentity> = inner
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &expired {
            if let Some(entry) = inner.remove(identity) {
                info!(identity = %identity, "Evicting expired advertisement");
                if let Some(suite) = entry.suite {
                    suite.cancel();
                }
            }
        }
        expired.len()
    }

    /// Background janitor reclaiming expired entries until cancelled.
    pub async fn janitor(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Catalog janitor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, "Catalog janitor reclaimed expired entries");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelican_core::{IssuerKey, NamespaceAd};
    use url::Url;

    fn signed_ad(name: &str, role: ServerRole, prefix: &str) -> SignedAdvertisement {
        let key = IssuerKey::generate();
        Advertisement {
            name: name.into(),
            role,
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
        .sign(&key)
        .unwrap()
    }

    #[test]
    fn test_upsert_replaces_entry_for_same_identity() {
        let catalog = Catalog::new(Duration::from_secs(60));
        catalog.upsert(signed_ad("o1", ServerRole::Origin, "/a"), |_| None);
        catalog.upsert(signed_ad("o1", ServerRole::Origin, "/b"), |_| None);

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].ad.namespaces[0].prefix, "/b");
    }

    #[test]
    fn test_same_name_different_role_are_distinct() {
        let catalog = Catalog::new(Duration::from_secs(60));
        catalog.upsert(signed_ad("s1", ServerRole::Origin, "/a"), |_| None);
        catalog.upsert(signed_ad("s1", ServerRole::Cache, "/a"), |_| None);

        assert_eq!(catalog.snapshot().len(), 2);
    }

    #[test]
    fn test_expired_entries_are_not_live() {
        let catalog = Catalog::new(Duration::from_millis(0));
        catalog.upsert(signed_ad("o1", ServerRole::Origin, "/a"), |_| None);

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].live);

        assert_eq!(catalog.evict_expired(), 1);
        assert!(catalog.snapshot().is_empty());
    }

    #[test]
    fn test_upsert_cancels_previous_suite() {
        let catalog = Catalog::new(Duration::from_secs(60));

        let first_token = CancellationToken::new();
        let first = first_token.clone();
        catalog.upsert(signed_ad("o1", ServerRole::Origin, "/a"), |identity| {
            Some(SuiteHandle::new(first.clone(), identity.name.clone()))
        });
        assert!(!first_token.is_cancelled());
        assert_eq!(metrics::active_suites_for("o1"), 1);

        let second_token = CancellationToken::new();
        let second = second_token.clone();
        catalog.upsert(signed_ad("o1", ServerRole::Origin, "/a"), |identity| {
            Some(SuiteHandle::new(second.clone(), identity.name.clone()))
        });

        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());
        assert_eq!(metrics::active_suites_for("o1"), 1);

        let identity = ServerIdentity {
            role: ServerRole::Origin,
            name: "o1".into(),
        };
        catalog.remove(&identity);
        assert!(second_token.is_cancelled());
        assert_eq!(metrics::active_suites_for("o1"), 0);
    }

    #[test]
    fn test_suite_gauge_stays_at_one_under_readvertisement() {
        let catalog = Catalog::new(Duration::from_secs(60));
        for _ in 0..20 {
            catalog.upsert(signed_ad("steady", ServerRole::Origin, "/a"), |identity| {
                Some(SuiteHandle::new(
                    CancellationToken::new(),
                    identity.name.clone(),
                ))
            });
            assert_eq!(metrics::active_suites_for("steady"), 1);
        }
        let identity = ServerIdentity {
            role: ServerRole::Origin,
            name: "steady".into(),
        };
        catalog.remove(&identity);
        assert_eq!(metrics::active_suites_for("steady"), 0);
    }
}
