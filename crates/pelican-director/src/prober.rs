//! Origin health probing
//!
//! On the first accepted advertisement from an origin, the director starts a
//! test suite bound to that identity. The suite runs a file-transfer test
//! (upload, download, delete) against the origin's data endpoint on a fixed
//! interval, using a monitoring token minted by the director with itself as
//! issuer and the origin as audience.
//!
//! Each run records two outcomes: the test itself, and the delivery of the
//! result report to the origin. Suites are cancelled through the handle
//! stored in the catalog entry; see [`crate::catalog`].

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use pelican_core::{FileTest, HealthMonitor, HealthStatus, IssuerKey, TestType};

use crate::catalog::{ServerIdentity, SuiteHandle};
use crate::metrics;

/// Spawns and runs per-origin health test suites.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    issuer_url: Url,
    key: IssuerKey,
    interval: Duration,
    health: HealthMonitor,
}

impl Prober {
    pub fn new(
        client: reqwest::Client,
        issuer_url: Url,
        key: IssuerKey,
        interval: Duration,
        health: HealthMonitor,
    ) -> Self {
        Self {
            client,
            issuer_url,
            key,
            interval,
            health,
        }
    }

    /// Per-origin health component name.
    fn component(identity: &ServerIdentity) -> String {
        format!("origin/{}", identity.name)
    }

    /// Start a suite for `identity`, probing `data_url` and reporting results
    /// to `web_url`. The returned handle cancels it.
    pub fn spawn_suite(
        &self,
        identity: &ServerIdentity,
        data_url: Url,
        web_url: Url,
        parent: &CancellationToken,
    ) -> SuiteHandle {
        let token = parent.child_token();
        let handle = SuiteHandle::new(token.clone(), identity.name.clone());

        let prober = self.clone();
        let identity = identity.clone();
        tokio::spawn(async move {
            prober.run_suite(identity, data_url, web_url, token).await;
        });
        handle
    }

    async fn run_suite(
        &self,
        identity: ServerIdentity,
        data_url: Url,
        web_url: Url,
        token: CancellationToken,
    ) {
        debug!(identity = %identity, "Health test suite started");
        let file_test = FileTest::new(self.client.clone(), self.issuer_url.clone(), self.key.clone());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(identity = %identity, "Health test suite cancelled");
                    self.health.remove(&Self::component(&identity));
                    return;
                }
                _ = ticker.tick() => {
                    self.run_once(&identity, &file_test, &data_url, &web_url).await;
                }
            }
        }
    }

    async fn run_once(
        &self,
        identity: &ServerIdentity,
        file_test: &FileTest,
        data_url: &Url,
        web_url: &Url,
    ) {
        let outcome = file_test.run(data_url, TestType::DirectorTest).await;
        let (result, status, message) = match &outcome {
            Ok(()) => ("success", HealthStatus::Ok, String::new()),
            Err(err) => {
                warn!(identity = %identity, error = %err, "Health test run failed");
                ("failure", HealthStatus::Critical, err.to_string())
            }
        };

        metrics::TEST_RUNS
            .with_label_values(&[&identity.name, result])
            .inc();
        self.health.set(&Self::component(identity), status);

        let reported = self.report_result(web_url, result, &message).await;
        metrics::TEST_REPORTS
            .with_label_values(&[&identity.name, if reported { "success" } else { "failure" }])
            .inc();
        if !reported {
            warn!(identity = %identity, "Failed to report test result to origin");
        }
    }

    /// Deliver the run outcome to the origin so its own health view reflects
    /// whether the director can reach it.
    async fn report_result(&self, web_url: &Url, result: &str, message: &str) -> bool {
        let mut report_url = web_url.clone();
        report_url.set_path("/api/v1.0/origin/directorTest");

        let response = self
            .client
            .post(report_url)
            .json(&json!({
                "status": result,
                "message": message,
            }))
            .send()
            .await;

        matches!(response, Ok(resp) if resp.status().is_success())
    }
}
