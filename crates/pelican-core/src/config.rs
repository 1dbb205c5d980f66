//! Configuration snapshots
//!
//! Components receive a validated, immutable configuration struct at
//! construction time and never consult process-wide state afterwards. Each
//! service binary assembles these snapshots once during startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PelicanError, Result};

/// Locations of the federation's central services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Base URL of the director
    pub director_url: Url,
    /// Base URL of the namespace registry
    pub registry_url: Url,
}

/// Deadlines applied to every outgoing HTTP request.
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub total: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            total: Duration::from_secs(30),
        }
    }
}

impl HttpTimeouts {
    /// Build a reqwest client carrying these deadlines.
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect)
            .timeout(self.total)
            .build()
            .map_err(|e| PelicanError::Config(format!("HTTP client: {}", e)))
    }
}

/// Identity and endpoints of the local server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name (site name) of this server
    pub name: String,
    /// Hostname of this server
    pub hostname: String,
    /// External web URL; doubles as the token issuer URL
    pub external_url: Url,
    /// URL of the data-plane endpoint
    pub data_url: Url,
    /// Geographic latitude, if known
    pub latitude: Option<f64>,
    /// Geographic longitude, if known
    pub longitude: Option<f64>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PelicanError::Config("server name must not be empty".into()));
        }
        if self.hostname.is_empty() {
            return Err(PelicanError::Config("server hostname must not be empty".into()));
        }
        Ok(())
    }
}

/// Registry service policy knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// External URL of the registry, used to construct jwks_uri values
    pub external_url: Url,
    /// Require administrator approval before serving origin JWKS
    pub require_origin_approval: bool,
    /// Require administrator approval before serving cache JWKS
    pub require_cache_approval: bool,
    /// Require sub-prefix registrations to share a key with an ancestor
    pub require_key_chaining: bool,
}

impl RegistryConfig {
    pub fn new(external_url: Url) -> Self {
        Self {
            external_url,
            require_origin_approval: false,
            require_cache_approval: false,
            require_key_chaining: true,
        }
    }
}

/// Director service tuning.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// How long an accepted advertisement stays routable without a refresh
    pub advertisement_ttl: Duration,
    /// Interval between health test runs against each origin
    pub health_test_interval: Duration,
    /// Deadline for a single stat probe or test-run request
    pub stat_timeout: Duration,
    /// Positive stat replies to wait for before responding
    pub min_stat_response: usize,
    /// Cap on concurrent stat probes per request
    pub max_stat_response: usize,
    /// Stat fan-out is enabled when this is > 0
    pub stat_concurrency_limit: usize,
    /// Accept advertisements whose prefix is not registered (degraded mode)
    pub accept_unregistered: bool,
    /// How many alternate endpoints to list in the Link header
    pub link_alternates: usize,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            advertisement_ttl: Duration::from_secs(15 * 60),
            health_test_interval: Duration::from_secs(15),
            stat_timeout: Duration::from_secs(2),
            min_stat_response: 1,
            max_stat_response: 4,
            stat_concurrency_limit: 0,
            accept_unregistered: false,
            link_alternates: 6,
        }
    }
}

impl DirectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.advertisement_ttl.is_zero() {
            return Err(PelicanError::Config("advertisement TTL must be positive".into()));
        }
        if self.health_test_interval.is_zero() {
            return Err(PelicanError::Config("health test interval must be positive".into()));
        }
        if self.min_stat_response > self.max_stat_response {
            return Err(PelicanError::Config(
                "min stat response must not exceed max stat response".into(),
            ));
        }
        Ok(())
    }
}

/// Origin/cache service loop tuning.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// The namespace prefix this server exports
    pub namespace_prefix: String,
    /// Whether unauthenticated reads are allowed on the exported namespace
    pub enable_public_reads: bool,
    /// Interval between self-test runs
    pub self_test_interval: Duration,
    /// Interval between advertisements; should be well under the director TTL
    pub advertise_interval: Duration,
    /// Cap on the backoff between registration retries
    pub registration_retry_interval: Duration,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: String::new(),
            enable_public_reads: false,
            self_test_interval: Duration::from_secs(15),
            advertise_interval: Duration::from_secs(5 * 60),
            registration_retry_interval: Duration::from_secs(30),
        }
    }
}

impl OriginConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.namespace_prefix.starts_with('/') {
            return Err(PelicanError::Config(format!(
                "namespace prefix '{}' must start with '/'",
                self.namespace_prefix
            )));
        }
        if self.advertise_interval.is_zero() || self.self_test_interval.is_zero() {
            return Err(PelicanError::Config("loop intervals must be positive".into()));
        }
        Ok(())
    }
}

/// The configuration directory. `PELICAN_CONFIG_DIR` wins when set; daemon
/// deployments (no `HOME`) fall back to `/etc/pelican`, user sessions to
/// `$HOME/.config/pelican`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("PELICAN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".config").join("pelican"),
        _ => PathBuf::from("/etc/pelican"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_director_config_validation() {
        let mut config = DirectorConfig::default();
        config.validate().unwrap();

        config.min_stat_response = 10;
        config.max_stat_response = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_origin_prefix_must_be_absolute() {
        let config = OriginConfig {
            namespace_prefix: "foo/bar".into(),
            ..OriginConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
