//! Prometheus metrics exposition
//!
//! Service-level metrics recorded here:
//!
//! - `gateway_requests_total` (counter): labels `status`, `route`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_available_keys` (gauge)
//!
//! Per-attempt scheduler counters (`scheduler_*`) are emitted by the
//! `key-pool` crate and rendered through the same recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "gateway_request_duration_seconds";

/// Request duration buckets. A chat completion can spend several backoff
/// sleeps plus upstream latency, so the range reaches five minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "route" => route)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "status" => status_str).record(duration_secs);
}

/// Publish the number of keys a selection would currently accept.
pub fn set_available_keys(count: usize) {
    metrics::gauge!("gateway_available_keys").set(count as f64);
}
