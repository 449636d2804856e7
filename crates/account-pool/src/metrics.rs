//! Refresh metrics
//!
//! - `credential_refresh_total` (counter): labels `mode`, `outcome`
//! - `credential_refresh_cycles_total` (counter): label `result`
//! - `credential_refresh_cycle_duration_seconds` (histogram)
//! - `credential_refresh_cycle_errors_total` (counter)
//!
//! Without an installed recorder these are no-ops.

/// Name of the cycle duration histogram, for bucket configuration.
pub const CYCLE_DURATION_METRIC: &str = "credential_refresh_cycle_duration_seconds";

/// Record one account refresh attempt. `outcome` is the resulting account
/// status label, `in_progress` or `missing_credentials`.
pub fn record_refresh(mode: &str, outcome: &str) {
    metrics::counter!(
        "credential_refresh_total",
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a finished cycle. `result` is `completed`, `skipped` or `disabled`.
pub fn record_cycle(result: &str, duration_secs: Option<f64>) {
    metrics::counter!("credential_refresh_cycles_total", "result" => result.to_string())
        .increment(1);
    if let Some(secs) = duration_secs {
        metrics::histogram!(CYCLE_DURATION_METRIC).record(secs);
    }
}

/// Record a cycle that failed before refreshing anything.
pub fn record_cycle_error() {
    metrics::counter!("credential_refresh_cycle_errors_total").increment(1);
}
