//! Object request routing
//!
//! For each client object request the director matches the path against the
//! catalog, filters by role, ranks the candidates geographically, and
//! answers with a 307 redirect plus a `Link` header of alternates for
//! client-side fallback.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::HeaderMap;
use url::Url;

use pelican_core::ServerRole;

use crate::catalog::{EntrySnapshot, ServerIdentity};
use crate::geo::{haversine_km, Coordinate};

/// A routable endpoint serving the requested path.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub identity: ServerIdentity,
    pub data_url: Url,
    pub web_url: Url,
    pub coordinate: Option<Coordinate>,
}

/// Result of matching a path against the catalog.
#[derive(Debug, Default)]
pub struct MatchResult {
    /// Live entries serving the longest matching prefix
    pub live: Vec<Candidate>,
    /// Expired entries that would have matched; routing must not use them,
    /// but their existence distinguishes "gone stale" from "unknown"
    pub stale: usize,
}

/// Whether `path` falls under the namespace `prefix`.
fn prefix_matches(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Longest-prefix match over the catalog snapshot, restricted to `roles`.
pub fn match_path(path: &str, entries: &[EntrySnapshot], roles: &[ServerRole]) -> MatchResult {
    let mut best_len = 0;
    let mut live: Vec<(usize, Candidate)> = Vec::new();
    let mut stale = 0;

    for entry in entries {
        if !roles.contains(&entry.identity.role) {
            continue;
        }
        let matched = entry
            .ad
            .namespaces
            .iter()
            .filter(|ns| prefix_matches(path, &ns.prefix))
            .map(|ns| ns.prefix.trim_end_matches('/').len())
            .max();
        let Some(len) = matched else { continue };

        if !entry.live {
            stale += 1;
            continue;
        }

        best_len = best_len.max(len);
        live.push((
            len,
            Candidate {
                identity: entry.identity.clone(),
                data_url: entry.ad.data_url.clone(),
                web_url: entry.ad.web_url.clone(),
                coordinate: match (entry.ad.lat, entry.ad.lon) {
                    (Some(lat), Some(lon)) => Some(Coordinate { lat, lon }),
                    _ => None,
                },
            },
        ));
    }

    MatchResult {
        live: live
            .into_iter()
            .filter(|(len, _)| *len == best_len)
            .map(|(_, candidate)| candidate)
            .collect(),
        stale,
    }
}

/// Round-robin state shared by the ranking; one counter spreads ties across
/// successive requests.
#[derive(Debug, Default)]
pub struct RoundRobin(AtomicUsize);

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Distances closer than this are considered a tie.
const TIE_EPSILON_KM: f64 = 1.0;

/// Order candidates by distance from the client, rotating the leading tie
/// group round-robin so equally-close endpoints share the load. Candidates
/// without coordinates (or with an unlocatable client) sort last, in
/// round-robin order.
pub fn rank(mut candidates: Vec<Candidate>, client: Option<Coordinate>, rr: &RoundRobin) -> Vec<Candidate> {
    if candidates.len() <= 1 {
        return candidates;
    }

    let distance = |candidate: &Candidate| -> f64 {
        match (client, candidate.coordinate) {
            (Some(client), Some(coordinate)) => haversine_km(client, coordinate),
            _ => f64::INFINITY,
        }
    };

    candidates.sort_by(|a, b| distance(a).partial_cmp(&distance(b)).unwrap());

    // Rotate the leading group of ties.
    let lead = distance(&candidates[0]);
    let tie_end = candidates
        .iter()
        .take_while(|c| {
            let d = distance(c);
            d == lead || (d.is_finite() && (d - lead).abs() < TIE_EPSILON_KM) || (d.is_infinite() && lead.is_infinite())
        })
        .count();
    if tie_end > 1 {
        candidates[..tie_end].rotate_left(rr.next() % tie_end);
    }
    candidates
}

/// The redirect target for `candidate` and the requested path.
pub fn location_url(candidate: &Candidate, path: &str) -> Url {
    let mut url = candidate.data_url.clone();
    url.set_path(path);
    url
}

/// Render the `Link` header listing up to `limit` alternates after the
/// selected endpoint, in priority order.
pub fn link_header(candidates: &[Candidate], path: &str, limit: usize) -> Option<String> {
    let alternates: Vec<String> = candidates
        .iter()
        .skip(1)
        .take(limit)
        .enumerate()
        .map(|(index, candidate)| {
            format!(
                "<{}>; rel=\"duplicate\"; pri={}",
                location_url(candidate, path),
                index + 1
            )
        })
        .collect();
    if alternates.is_empty() {
        None
    } else {
        Some(alternates.join(", "))
    }
}

/// Client address as reported by a fronting proxy, falling back to nothing.
/// The director trusts `X-Forwarded-For` from its ingress.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    forwarded.split(',').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelican_core::{Advertisement, NamespaceAd};

    fn entry(
        name: &str,
        role: ServerRole,
        prefixes: &[&str],
        coordinate: Option<(f64, f64)>,
        live: bool,
    ) -> EntrySnapshot {
        EntrySnapshot {
            identity: ServerIdentity {
                role,
                name: name.into(),
            },
            ad: Advertisement {
                name: name.into(),
                role,
                data_url: Url::parse(&format!("https://{}.example.com:8443", name)).unwrap(),
                web_url: Url::parse(&format!("https://{}.example.com:8444", name)).unwrap(),
                namespaces: prefixes
                    .iter()
                    .map(|prefix| NamespaceAd {
                        prefix: prefix.to_string(),
                        issuers: vec![],
                        public_read: true,
                    })
                    .collect(),
                lat: coordinate.map(|c| c.0),
                lon: coordinate.map(|c| c.1),
            },
            live,
        }
    }

    #[test]
    fn test_prefix_matching() {
        assert!(prefix_matches("/data/file.bin", "/data"));
        assert!(prefix_matches("/data", "/data"));
        assert!(prefix_matches("/data/sub/file", "/data/sub"));
        assert!(!prefix_matches("/database/file", "/data"));
        assert!(!prefix_matches("/other", "/data"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let entries = vec![
            entry("short", ServerRole::Origin, &["/data"], None, true),
            entry("long", ServerRole::Origin, &["/data/sub"], None, true),
        ];

        let result = match_path("/data/sub/file.bin", &entries, &[ServerRole::Origin]);
        assert_eq!(result.live.len(), 1);
        assert_eq!(result.live[0].identity.name, "long");
    }

    #[test]
    fn test_role_filter() {
        let entries = vec![
            entry("o1", ServerRole::Origin, &["/data"], None, true),
            entry("c1", ServerRole::Cache, &["/data"], None, true),
        ];

        let caches = match_path("/data/x", &entries, &[ServerRole::Cache]);
        assert_eq!(caches.live.len(), 1);
        assert_eq!(caches.live[0].identity.role, ServerRole::Cache);
    }

    #[test]
    fn test_stale_entries_counted_not_returned() {
        let entries = vec![entry("gone", ServerRole::Cache, &["/data"], None, false)];

        let result = match_path("/data/x", &entries, &[ServerRole::Cache]);
        assert!(result.live.is_empty());
        assert_eq!(result.stale, 1);
    }

    #[test]
    fn test_geo_ranking_prefers_closer_cache() {
        // Client near Chicago; cacheA in Madison, cacheB in San Francisco.
        let entries = vec![
            entry("cacheA", ServerRole::Cache, &["/data"], Some((43.0, -89.4)), true),
            entry("cacheB", ServerRole::Cache, &["/data"], Some((37.8, -122.4)), true),
        ];
        let result = match_path("/data/file.bin", &entries, &[ServerRole::Cache]);
        let client = Some(Coordinate { lat: 41.9, lon: -87.6 });

        let ranked = rank(result.live, client, &RoundRobin::new());
        assert_eq!(ranked[0].identity.name, "cacheA");
        assert_eq!(ranked[1].identity.name, "cacheB");
    }

    #[test]
    fn test_round_robin_rotates_ties() {
        let entries = vec![
            entry("c1", ServerRole::Cache, &["/data"], None, true),
            entry("c2", ServerRole::Cache, &["/data"], None, true),
        ];
        let rr = RoundRobin::new();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let result = match_path("/data/x", &entries, &[ServerRole::Cache]);
            let ranked = rank(result.live, None, &rr);
            seen.insert(ranked[0].identity.name.clone());
        }
        // Both endpoints take the lead across successive requests.
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_location_and_link_header() {
        let entries = vec![
            entry("c1", ServerRole::Cache, &["/data"], Some((43.0, -89.4)), true),
            entry("c2", ServerRole::Cache, &["/data"], Some((37.8, -122.4)), true),
        ];
        let result = match_path("/data/file.bin", &entries, &[ServerRole::Cache]);
        let ranked = rank(
            result.live,
            Some(Coordinate { lat: 41.9, lon: -87.6 }),
            &RoundRobin::new(),
        );

        let location = location_url(&ranked[0], "/data/file.bin");
        assert_eq!(location.as_str(), "https://c1.example.com:8443/data/file.bin");

        let link = link_header(&ranked, "/data/file.bin", 6).unwrap();
        assert!(link.contains("https://c2.example.com:8443/data/file.bin"));
        assert!(link.contains("pri=1"));
    }

    #[test]
    fn test_client_ip_from_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("198.51.100.7".parse().unwrap()));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
