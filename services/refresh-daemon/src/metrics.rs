//! Prometheus recorder for the refresh metrics
//!
//! The metrics themselves are emitted by `account_pool::metrics`; this module
//! installs the exporter and configures histogram buckets so cycle durations
//! render as `_bucket` lines rather than a summary.

use account_pool::metrics::CYCLE_DURATION_METRIC;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Cycle duration buckets, from a near-empty pool (50ms) to a full batch of
/// slow refreshes spaced by the inter-request delay (10 minutes).
const CYCLE_DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(CYCLE_DURATION_METRIC.to_string()),
        CYCLE_DURATION_BUCKETS,
    )
}

/// Install the global recorder and return a handle for rendering `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}
