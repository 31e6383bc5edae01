//! Metrics collection and exposition.
//!
//! # Metrics
//! - `echo_connections_accepted_total` (counter)
//! - `echo_connections_closed_total` (counter): by close reason
//! - `echo_active_connections` (gauge): current registry size
//! - `echo_work_items_enqueued_total` (counter)
//! - `echo_responses_sent_total` (counter)
//! - `echo_response_failures_total` (counter)
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_accepted() {
    metrics::counter!("echo_connections_accepted_total").increment(1);
}

pub fn record_closed(reason: &'static str) {
    metrics::counter!("echo_connections_closed_total", "reason" => reason).increment(1);
}

pub fn set_active_connections(count: usize) {
    metrics::gauge!("echo_active_connections").set(count as f64);
}

pub fn record_enqueued() {
    metrics::counter!("echo_work_items_enqueued_total").increment(1);
}

pub fn record_response(delivered: bool) {
    if delivered {
        metrics::counter!("echo_responses_sent_total").increment(1);
    } else {
        metrics::counter!("echo_response_failures_total").increment(1);
    }
}
