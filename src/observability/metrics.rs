//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hotroute_rebuilds_total` (counter): rebuilds by outcome
//! - `hotroute_rebuild_duration_seconds` (histogram): build → swap latency
//! - `hotroute_live_generation` (gauge): generation of the live route table
//! - `hotroute_api_requests_total` (counter): API requests by method, status
//! - `hotroute_api_request_duration_seconds` (histogram): API latency
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - The Prometheus endpoint is opt-in through `observability.metrics_enabled`

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_rebuild(outcome: &'static str, started: Instant) {
    counter!("hotroute_rebuilds_total", "outcome" => outcome).increment(1);
    histogram!("hotroute_rebuild_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn set_live_generation(generation: u64) {
    gauge!("hotroute_live_generation").set(generation as f64);
}

pub fn record_api_request(method: &str, status: u16, started: Instant) {
    counter!(
        "hotroute_api_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("hotroute_api_request_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}
