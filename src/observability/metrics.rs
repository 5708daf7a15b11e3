//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): HTTP requests by method, status
//! - `gateway_request_duration_seconds` (histogram): HTTP latency
//! - `gateway_backend_messages_total` (counter): envelopes by direction
//! - `gateway_backend_timeouts_total` (counter): requests that timed out
//! - `gateway_backend_send_failures_total` (counter): failed writes
//! - `gateway_cache_lookups_total` (counter): cache lookups by result
//! - `gateway_cache_entries` (gauge): entries held by the response cache

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// `direction` is `sent` or `received`.
pub fn record_backend_message(direction: &'static str) {
    counter!("gateway_backend_messages_total", "direction" => direction).increment(1);
}

pub fn record_backend_timeout() {
    counter!("gateway_backend_timeouts_total").increment(1);
}

pub fn record_backend_send_failure() {
    counter!("gateway_backend_send_failures_total").increment(1);
}

/// `result` is `hit`, `miss` or `bypass`.
pub fn record_cache_lookup(result: &'static str) {
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("gateway_cache_entries").set(entries as f64);
}
