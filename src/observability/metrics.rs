//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency by method
//! - `proxy_cache_lookups_total` (counter): hit / miss / error
//! - `proxy_cache_writes_total` (counter): stored / skipped / error
//! - `proxy_upstream_failures_total` (counter): timeout / network / status
//! - `proxy_rejections_total` (counter): target rejections by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exposition runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_write(result: &'static str) {
    counter!("proxy_cache_writes_total", "result" => result).increment(1);
}

pub fn record_upstream_failure(kind: &'static str) {
    counter!("proxy_upstream_failures_total", "kind" => kind).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    counter!("proxy_rejections_total", "reason" => reason).increment(1);
}
