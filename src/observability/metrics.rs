//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_upstream_errors_total` (counter): failed upstream dials/requests
//! - `gateway_ws_sessions_active` (gauge): currently bridged sessions
//! - `gateway_ws_sessions_total` (counter): sessions ever accepted
//! - `gateway_ws_frames_total` (counter): forwarded frames by direction
//! - `gateway_ws_frames_dropped_total` (counter): frames that could not be forwarded
//! - `gateway_rate_limited_total` (counter): rejected requests by limiter
//! - `gateway_close_errors_total` (counter): channel close failures by phase
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

use crate::session::Side;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("gateway_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn session_opened() {
    counter!("gateway_ws_sessions_total").increment(1);
    gauge!("gateway_ws_sessions_active").increment(1.0);
}

pub fn session_closed() {
    gauge!("gateway_ws_sessions_active").decrement(1.0);
}

/// A frame read from `from` was forwarded to the opposite side.
pub fn record_frame(from: Side) {
    let direction = match from {
        Side::Client => "client_to_upstream",
        Side::Upstream => "upstream_to_client",
    };
    counter!("gateway_ws_frames_total", "direction" => direction).increment(1);
}

pub fn record_dropped_frame(reason: &'static str) {
    counter!("gateway_ws_frames_dropped_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited(limiter: &'static str) {
    counter!("gateway_rate_limited_total", "limiter" => limiter).increment(1);
}

pub fn record_close_error(phase: &'static str) {
    counter!("gateway_close_errors_total", "phase" => phase).increment(1);
}
