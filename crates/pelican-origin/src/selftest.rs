//! Origin self-test loop
//!
//! On a fixed interval the origin uploads, downloads, and deletes a probe
//! object through its own data plane, using a freshly minted monitoring
//! token whose audience is the origin itself. The outcome lands in the
//! `director` health component: OK on success, Critical on failure.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use pelican_core::{FileTest, HealthMonitor, HealthStatus, TestType};

/// Health component updated by the self-test.
pub const SELF_TEST_COMPONENT: &str = "director";

/// Periodic self-test runner for one origin.
pub struct SelfTestRunner {
    file_test: FileTest,
    data_url: Url,
    interval: Duration,
    health: HealthMonitor,
}

impl SelfTestRunner {
    pub fn new(
        file_test: FileTest,
        data_url: Url,
        interval: Duration,
        health: HealthMonitor,
    ) -> Self {
        Self {
            file_test,
            data_url,
            interval,
            health,
        }
    }

    /// Run one self-test and record the outcome.
    pub async fn run_once(&self) {
        match self.file_test.run(&self.data_url, TestType::SelfTest).await {
            Ok(()) => {
                debug!("Self-test passed");
                self.health.set(SELF_TEST_COMPONENT, HealthStatus::Ok);
            }
            Err(err) => {
                warn!(error = %err, "Self-test failed");
                self.health.set(SELF_TEST_COMPONENT, HealthStatus::Critical);
            }
        }
    }

    /// Self-test on a fixed interval until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Self-test runner shutting down");
                    return;
                }
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }
}
