//! Director Server Binary
//!
//! Runs the routing and health-probing director for a Pelican federation.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use pelican_core::config::{config_dir, DirectorConfig, HttpTimeouts};
use pelican_core::{shutdown, HealthMonitor, IssuerKey, JwksCache, EXIT_FATAL};
use pelican_director::router::RoundRobin;
use pelican_director::{
    create_router, spawn_janitor, AdVerifier, AppState, Catalog, Prober, StaticResolver,
};

#[tokio::main]
async fn main() {
    let log_level = env::var("PELICAN_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if let Err(err) = run().await {
        error!(error = %err, "Director failed");
        std::process::exit(EXIT_FATAL);
    }
}

async fn run() -> pelican_core::Result<()> {
    let port: u16 = env::var("PELICAN_DIRECTOR_PORT")
        .unwrap_or_else(|_| "8445".into())
        .parse()
        .map_err(|e| {
            pelican_core::PelicanError::Config(format!("PELICAN_DIRECTOR_PORT: {}", e))
        })?;

    let external_url: Url = env::var("PELICAN_DIRECTOR_EXTERNAL_URL")
        .unwrap_or_else(|_| format!("https://localhost:{}", port))
        .parse()?;
    let registry_url: Url = env::var("PELICAN_REGISTRY_URL")
        .map_err(|_| {
            pelican_core::PelicanError::Config("PELICAN_REGISTRY_URL is required".into())
        })?
        .parse()?;

    let mut config = DirectorConfig::default();
    if let Ok(ttl) = env::var("PELICAN_ADVERTISEMENT_TTL_SECS") {
        config.advertisement_ttl = Duration::from_secs(ttl.parse().map_err(|e| {
            pelican_core::PelicanError::Config(format!("PELICAN_ADVERTISEMENT_TTL_SECS: {}", e))
        })?);
    }
    if let Ok(interval) = env::var("PELICAN_HEALTH_TEST_INTERVAL_SECS") {
        config.health_test_interval = Duration::from_secs(interval.parse().map_err(|e| {
            pelican_core::PelicanError::Config(format!(
                "PELICAN_HEALTH_TEST_INTERVAL_SECS: {}",
                e
            ))
        })?);
    }
    config.validate()?;

    let key = IssuerKey::load_or_generate(&config_dir().join("issuer.jwk"), None)?;
    let client = HttpTimeouts::default().client()?;
    let jwks_cache = JwksCache::new(client.clone());

    let shutdown = shutdown::shutdown_token();
    let state = Arc::new(AppState {
        catalog: Arc::new(Catalog::new(config.advertisement_ttl)),
        verifier: AdVerifier::new(jwks_cache, registry_url, config.accept_unregistered),
        prober: Prober::new(
            client.clone(),
            external_url,
            key,
            config.health_test_interval,
            HealthMonitor::new(),
        ),
        config,
        geo: Arc::new(StaticResolver::new()),
        round_robin: RoundRobin::new(),
        shutdown: shutdown.clone(),
        client,
    });

    spawn_janitor(&state);

    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Director listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
