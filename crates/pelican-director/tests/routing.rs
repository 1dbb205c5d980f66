//! Integration tests for the director API
//!
//! These drive the axum router directly and cover advertisement acceptance,
//! signature rejection, geographic redirect selection, TTL expiry behavior,
//! and the namespace listing.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use url::Url;

use pelican_core::config::DirectorConfig;
use pelican_core::{
    Advertisement, HealthMonitor, IssuerKey, JwksCache, NamespaceAd, ServerRole,
    SignedAdvertisement,
};
use pelican_director::router::RoundRobin;
use pelican_director::{
    create_router, AdVerifier, AppState, Catalog, Coordinate, Prober, StaticResolver,
};

const REGISTRY_URL: &str = "https://registry.example.com";
const CLIENT_IP: &str = "198.51.100.7";

struct Harness {
    router: Router,
    jwks_cache: JwksCache,
    state: Arc<AppState>,
}

fn harness(ttl: Duration) -> Harness {
    let client = reqwest::Client::new();
    let jwks_cache = JwksCache::new(client.clone());

    let config = DirectorConfig {
        advertisement_ttl: ttl,
        ..DirectorConfig::default()
    };

    // The test client resolves to a spot near Chicago.
    let geo = StaticResolver::new().with_override(
        CLIENT_IP.parse::<IpAddr>().unwrap(),
        Coordinate { lat: 41.9, lon: -87.6 },
    );

    let state = Arc::new(AppState {
        catalog: Arc::new(Catalog::new(ttl)),
        verifier: AdVerifier::new(
            jwks_cache.clone(),
            Url::parse(REGISTRY_URL).unwrap(),
            false,
        ),
        prober: Prober::new(
            client.clone(),
            Url::parse("https://director.example.com").unwrap(),
            IssuerKey::generate(),
            config.health_test_interval,
            HealthMonitor::new(),
        ),
        config,
        geo: Arc::new(geo),
        round_robin: RoundRobin::new(),
        shutdown: CancellationToken::new(),
        client,
    });

    Harness {
        router: create_router(state.clone()),
        jwks_cache,
        state,
    }
}

fn jwks_url_for(prefix: &str) -> String {
    format!(
        "{}/api/v1.0/registry{}/.well-known/issuer.jwks",
        REGISTRY_URL, prefix
    )
}

fn make_ad(
    name: &str,
    role: ServerRole,
    prefix: &str,
    coordinate: Option<(f64, f64)>,
    key: &IssuerKey,
) -> SignedAdvertisement {
    Advertisement {
        name: name.into(),
        role,
        data_url: Url::parse(&format!("https://{}.example.com:8443", name)).unwrap(),
        web_url: Url::parse(&format!("https://{}.example.com:8444", name)).unwrap(),
        namespaces: vec![NamespaceAd {
            prefix: prefix.into(),
            issuers: vec![],
            public_read: true,
        }],
        lat: coordinate.map(|c| c.0),
        lon: coordinate.map(|c| c.1),
    }
    .sign(key)
    .unwrap()
}

/// Seed the registry JWKS for `prefix` and advertise through the API.
async fn advertise(harness: &Harness, ad: &SignedAdvertisement, key: &IssuerKey) -> StatusCode {
    for ns in &ad.ad.namespaces {
        harness
            .jwks_cache
            .seed(&jwks_url_for(&ns.prefix), key.public_jwks())
            .await;
    }
    let endpoint = match ad.ad.role {
        ServerRole::Origin => "/api/v1.0/director/registerOrigin",
        ServerRole::Cache => "/api/v1.0/director/registerCache",
    };
    let request = Request::builder()
        .method(Method::POST)
        .uri(endpoint)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(ad).unwrap()))
        .unwrap();
    harness
        .router
        .clone()
        .oneshot(request)
        .await
        .unwrap()
        .status()
}

async fn get_object(harness: &Harness, path: &str) -> (StatusCode, Option<String>, Option<String>) {
    let request = Request::builder()
        .uri(format!("/api/v1.0/director/object{}", path))
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::empty())
        .unwrap();
    let response = harness.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get("location")
        .map(|v| v.to_str().unwrap().to_string());
    let link = response
        .headers()
        .get("link")
        .map(|v| v.to_str().unwrap().to_string());
    (status, location, link)
}

#[tokio::test]
async fn test_advertisement_with_unregistered_prefix_is_rejected() {
    let harness = harness(Duration::from_secs(60));
    let key = IssuerKey::generate();
    let ad = make_ad("c1", ServerRole::Cache, "/data", None, &key);

    // No JWKS seeded: the verifier's fetch fails and the ad is refused.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1.0/director/registerCache")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&ad).unwrap()))
        .unwrap();
    let status = harness.router.clone().oneshot(request).await.unwrap().status();
    assert_ne!(status, StatusCode::OK);
    assert!(harness.state.catalog.snapshot().is_empty());
}

#[tokio::test]
async fn test_advertisement_signed_by_wrong_key_is_rejected() {
    let harness = harness(Duration::from_secs(60));
    let registered = IssuerKey::generate();
    let interloper = IssuerKey::generate();

    // Registry knows `registered`, but the envelope is signed by the
    // interloper.
    harness
        .jwks_cache
        .seed(&jwks_url_for("/data"), registered.public_jwks())
        .await;
    let ad = make_ad("c1", ServerRole::Cache, "/data", None, &interloper);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1.0/director/registerCache")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&ad).unwrap()))
        .unwrap();
    let status = harness.router.clone().oneshot(request).await.unwrap().status();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_endpoint_mismatch_is_rejected() {
    let harness = harness(Duration::from_secs(60));
    let key = IssuerKey::generate();
    let ad = make_ad("c1", ServerRole::Cache, "/data", None, &key);
    harness
        .jwks_cache
        .seed(&jwks_url_for("/data"), key.public_jwks())
        .await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1.0/director/registerOrigin")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&ad).unwrap()))
        .unwrap();
    let status = harness.router.clone().oneshot(request).await.unwrap().status();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_redirect_selects_closer_cache() {
    let harness = harness(Duration::from_secs(60));
    let key = IssuerKey::generate();

    // cacheA is in Madison, cacheB in San Francisco; the client sits near
    // Chicago, so cacheA wins and cacheB is the listed alternate.
    let cache_a = make_ad("cachea", ServerRole::Cache, "/data", Some((43.0, -89.4)), &key);
    let cache_b = make_ad("cacheb", ServerRole::Cache, "/data", Some((37.8, -122.4)), &key);
    assert_eq!(advertise(&harness, &cache_a, &key).await, StatusCode::OK);
    assert_eq!(advertise(&harness, &cache_b, &key).await, StatusCode::OK);

    let (status, location, link) = get_object(&harness, "/data/file.bin").await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location.as_deref(),
        Some("https://cachea.example.com:8443/data/file.bin")
    );
    let link = link.unwrap();
    assert!(link.contains("https://cacheb.example.com:8443/data/file.bin"));
    assert!(link.contains("rel=\"duplicate\""));
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let harness = harness(Duration::from_secs(60));
    let (status, _, _) = get_object(&harness, "/nowhere/file.bin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stale_advertisements_yield_502() {
    // TTL of zero: every accepted advertisement is immediately stale.
    let harness = harness(Duration::from_secs(0));
    let key = IssuerKey::generate();
    let ad = make_ad("cachea", ServerRole::Cache, "/data", None, &key);
    assert_eq!(advertise(&harness, &ad, &key).await, StatusCode::OK);

    let (status, _, _) = get_object(&harness, "/data/file.bin").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_refresh_keeps_entry_routable() {
    let harness = harness(Duration::from_millis(200));
    let key = IssuerKey::generate();
    let ad = make_ad("cachea", ServerRole::Cache, "/data", None, &key);

    assert_eq!(advertise(&harness, &ad, &key).await, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Refresh resets the TTL; the entry outlives the original deadline.
    assert_eq!(advertise(&harness, &ad, &key).await, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(120)).await;

    let (status, _, _) = get_object(&harness, "/data/file.bin").await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn test_list_namespaces_reports_origin_ads() {
    let harness = harness(Duration::from_secs(60));
    let key = IssuerKey::generate();

    let origin = make_ad("o1", ServerRole::Origin, "/foo", None, &key);
    let cache = make_ad("c1", ServerRole::Cache, "/foo", None, &key);
    assert_eq!(advertise(&harness, &origin, &key).await, StatusCode::OK);
    assert_eq!(advertise(&harness, &cache, &key).await, StatusCode::OK);

    let request = Request::builder()
        .uri("/api/v1.0/director/listNamespaces")
        .body(Body::empty())
        .unwrap();
    let response = harness.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let namespaces: Value = serde_json::from_slice(&bytes).unwrap();
    // Only the origin's namespaces are listed.
    assert_eq!(namespaces.as_array().unwrap().len(), 1);
    assert_eq!(namespaces[0]["prefix"], "/foo");
}
