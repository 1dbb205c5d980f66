//! Registry Server Binary
//!
//! Runs the namespace registry HTTP server for a Pelican federation.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use pelican_core::config::{config_dir, RegistryConfig};
use pelican_core::{shutdown, IssuerKey, EXIT_FATAL};
use pelican_registry::{
    create_router, AppState, MemoryStore, NonceStore, RegistryStore, SqliteStore,
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
        error!(error = %err, "Registry failed");
        std::process::exit(EXIT_FATAL);
    }
}

async fn run() -> pelican_core::Result<()> {
    let port: u16 = env::var("PELICAN_REGISTRY_PORT")
        .unwrap_or_else(|_| "8444".into())
        .parse()
        .map_err(|e| {
            pelican_core::PelicanError::Config(format!("PELICAN_REGISTRY_PORT: {}", e))
        })?;

    let external_url: Url = env::var("PELICAN_REGISTRY_EXTERNAL_URL")
        .unwrap_or_else(|_| format!("https://localhost:{}", port))
        .parse()?;

    let mut config = RegistryConfig::new(external_url);
    config.require_origin_approval = env_flag("PELICAN_REQUIRE_ORIGIN_APPROVAL");
    config.require_cache_approval = env_flag("PELICAN_REQUIRE_CACHE_APPROVAL");
    if env::var_os("PELICAN_DISABLE_KEY_CHAINING").is_some() {
        config.require_key_chaining = false;
    }

    let key_path = config_dir().join("issuer.jwk");
    let key = IssuerKey::load_or_generate(&key_path, None)?;

    let store: Arc<dyn RegistryStore> = match env::var_os("PELICAN_REGISTRY_DB") {
        Some(path) => {
            let path = PathBuf::from(path);
            info!(path = %path.display(), "Using SQLite namespace store");
            Arc::new(
                SqliteStore::open(&path)
                    .map_err(|e| pelican_core::PelicanError::Config(e.to_string()))?,
            )
        }
        None => {
            info!("Using in-memory namespace store; registrations will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState {
        store,
        key,
        config,
        nonces: NonceStore::new(),
        oidc: None,
    });

    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Registry listening");

    let token = shutdown::shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    Ok(())
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
