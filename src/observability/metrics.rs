//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_reloads_total` (counter): reload attempts by kind and outcome
//! - `gateway_active_generation` (gauge): generation of the live configuration
//! - `gateway_connect_failures_total` (counter): failed connects by data source
//! - `gateway_disconnect_failures_total` (counter): failed disconnects by data source
//! - `gateway_requests_total` (counter): requests by endpoint and status
//! - `gateway_request_duration_seconds` (histogram): request latency
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the end of a reload attempt.
pub fn record_reload(kind: &'static str, outcome: &'static str) {
    counter!("gateway_reloads_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn set_active_generation(generation: u64) {
    gauge!("gateway_active_generation").set(generation as f64);
}

pub fn record_connect_failure(source: &str) {
    counter!("gateway_connect_failures_total", "source" => source.to_string()).increment(1);
}

pub fn record_disconnect_failure(source: &str) {
    counter!("gateway_disconnect_failures_total", "source" => source.to_string()).increment(1);
}

pub fn record_request(endpoint: &'static str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
}
