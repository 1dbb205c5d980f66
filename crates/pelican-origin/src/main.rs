//! Origin Server Binary
//!
//! Runs the control-plane side of a Pelican origin: authorization file
//! rendering for the data plane, registry registration, periodic
//! advertisement, the self-test loop, and the origin web API.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pelican_core::config::{config_dir, FederationConfig, HttpTimeouts, OriginConfig, ServerConfig};
use pelican_core::{
    shutdown, FileTest, HealthMonitor, IssuerKey, PelicanError, ServerRole, EXIT_FATAL,
};
use pelican_origin::{
    authfile, create_router, Advertiser, OriginState, ScitokensConfig, SelfTestRunner,
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
        error!(error = %err, "Origin failed");
        std::process::exit(EXIT_FATAL);
    }
}

fn required(name: &str) -> pelican_core::Result<String> {
    env::var(name).map_err(|_| PelicanError::Config(format!("{} is required", name)))
}

async fn run() -> pelican_core::Result<()> {
    let port: u16 = env::var("PELICAN_ORIGIN_PORT")
        .unwrap_or_else(|_| "8444".into())
        .parse()
        .map_err(|e| PelicanError::Config(format!("PELICAN_ORIGIN_PORT: {}", e)))?;

    let server = ServerConfig {
        name: required("PELICAN_SITENAME")?,
        hostname: required("PELICAN_HOSTNAME")?,
        external_url: required("PELICAN_EXTERNAL_URL")?.parse()?,
        data_url: required("PELICAN_DATA_URL")?.parse()?,
        latitude: env::var("PELICAN_LATITUDE").ok().and_then(|v| v.parse().ok()),
        longitude: env::var("PELICAN_LONGITUDE").ok().and_then(|v| v.parse().ok()),
    };
    server.validate()?;

    let federation = FederationConfig {
        director_url: required("PELICAN_DIRECTOR_URL")?.parse()?,
        registry_url: required("PELICAN_REGISTRY_URL")?.parse()?,
    };

    let mut origin = OriginConfig {
        namespace_prefix: required("PELICAN_NAMESPACE_PREFIX")?,
        enable_public_reads: matches!(
            env::var("PELICAN_ENABLE_PUBLIC_READS").as_deref(),
            Ok("1") | Ok("true")
        ),
        ..OriginConfig::default()
    };
    if let Ok(interval) = env::var("PELICAN_ADVERTISE_INTERVAL_SECS") {
        origin.advertise_interval = Duration::from_secs(interval.parse().map_err(|e| {
            PelicanError::Config(format!("PELICAN_ADVERTISE_INTERVAL_SECS: {}", e))
        })?);
    }
    origin.validate()?;

    let role = ServerRole::from_prefix(&origin.namespace_prefix);
    let daemon_gid: Option<u32> = env::var("PELICAN_DAEMON_GID").ok().and_then(|v| v.parse().ok());
    let key = IssuerKey::load_or_generate(&config_dir().join("issuer.jwk"), daemon_gid)?;
    let client = HttpTimeouts::default().client()?;
    let health = HealthMonitor::new();

    // The namespaces this server exports; caches also cover whatever the
    // federation's origins currently advertise.
    let mut namespace_ads = vec![pelican_core::NamespaceAd {
        prefix: origin.namespace_prefix.clone(),
        issuers: vec![pelican_core::TokenIssuerAd {
            issuer_url: server.external_url.clone(),
            base_paths: vec![origin.namespace_prefix.clone()],
            restricted_paths: vec![],
        }],
        public_read: origin.enable_public_reads,
    }];
    if role == ServerRole::Cache {
        match pelican_origin::advertiser::fetch_director_namespaces(
            &client,
            &federation.director_url,
        )
        .await
        {
            Ok(ads) => namespace_ads.extend(ads),
            Err(err) => {
                warn!(error = %err, "Could not list federation namespaces; authorization files cover the local export only")
            }
        }
    }

    // Render the data-plane authorization files before anything advertises.
    if let Some(run_location) = env::var_os("PELICAN_XROOTD_RUN_LOCATION") {
        let run_location = PathBuf::from(run_location);
        emit_authorization_files(
            &run_location,
            role,
            &server,
            &origin,
            &namespace_ads,
            daemon_gid,
        )?;
    } else {
        warn!("PELICAN_XROOTD_RUN_LOCATION unset; skipping authorization file generation");
    }

    let advertiser = Arc::new(Advertiser::new(
        client.clone(),
        federation,
        server.clone(),
        origin.clone(),
        key.clone(),
        role,
    ));
    let self_test = Arc::new(SelfTestRunner::new(
        FileTest::new(client.clone(), server.external_url.clone(), key.clone()),
        server.data_url.clone(),
        origin.self_test_interval,
        health.clone(),
    ));

    let token = shutdown::shutdown_token();
    let mut tasks = JoinSet::new();

    // Registration must complete before the advertise loop starts; both are
    // cancelled together.
    {
        let advertiser = advertiser.clone();
        let token = token.child_token();
        tasks.spawn(async move {
            if advertiser.register_with_retry(&token).await {
                advertiser.advertise_loop(token).await;
            }
        });
    }

    if role == ServerRole::Origin {
        let self_test = self_test.clone();
        let token = token.child_token();
        tasks.spawn(async move { self_test.run(token).await });
    }

    let drain_health = health.clone();
    let state = Arc::new(OriginState {
        key,
        health,
    });
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, role = %role, "Origin web API listening");

    let serve_token = token.clone();
    tasks.spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(serve_token.cancelled_owned())
            .await
        {
            error!(error = %err, "Origin web API failed");
        }
    });

    // Shutdown is complete when the task group drains. A panicked background
    // task demotes the server's health rather than taking the process down.
    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            warn!(error = %err, "Task exited abnormally");
            drain_health.set("tasks", pelican_core::HealthStatus::Critical);
        }
    }
    Ok(())
}

/// Render the authfile and scitokens configuration the data plane consumes.
fn emit_authorization_files(
    run_location: &std::path::Path,
    role: ServerRole,
    server: &ServerConfig,
    origin: &OriginConfig,
    namespace_ads: &[pelican_core::NamespaceAd],
    daemon_gid: Option<u32>,
) -> pelican_core::Result<()> {
    let input = match env::var_os("PELICAN_AUTHFILE") {
        Some(path) => std::fs::read_to_string(PathBuf::from(&path)).map_err(|e| {
            PelicanError::Config(format!("cannot read authfile {:?}: {}", path, e))
        })?,
        None => String::new(),
    };

    let rendered = authfile::render_authfile(role, &input, origin, namespace_ads)?;
    let authfile_path = run_location.join(format!("authfile-{}-generated", role));
    authfile::write_atomic(&authfile_path, &rendered, daemon_gid)?;
    info!(path = %authfile_path.display(), "Wrote authfile");

    let scitokens = ScitokensConfig::for_namespaces(
        server.data_url.as_str().trim_end_matches('/'),
        namespace_ads,
    );
    let scitokens_path = run_location.join(format!("scitokens-{}-generated.cfg", role));
    authfile::write_atomic(&scitokens_path, &authfile::render_scitokens(&scitokens), daemon_gid)?;
    info!(path = %scitokens_path.display(), "Wrote scitokens configuration");
    Ok(())
}
