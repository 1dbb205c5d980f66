//! Director Prometheus metrics

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Number of live health test suites per origin; 0 or 1 at all times.
pub static ACTIVE_TEST_SUITES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "pelican_director_active_test_suites",
        "Active health test suites per origin",
        &["server_name"]
    )
    .expect("register active test suite gauge")
});

/// Test run outcomes per origin.
pub static TEST_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pelican_director_test_runs_total",
        "Health test runs per origin by result",
        &["server_name", "result"]
    )
    .expect("register test run counter")
});

/// Result-report outcomes per origin.
pub static TEST_REPORTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pelican_director_test_reports_total",
        "Health test result reports per origin by result",
        &["server_name", "result"]
    )
    .expect("register test report counter")
});

/// Render the default registry in the Prometheus text format.
pub fn gather() -> String {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

/// Current active-suite gauge value for one origin.
pub fn active_suites_for(server_name: &str) -> i64 {
    ACTIVE_TEST_SUITES.with_label_values(&[server_name]).get()
}
