//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_backend_health` (gauge): 1=alive, 0=down, by backend
//! - `lb_backend_active_connections` (gauge): admitted connections, by backend
//! - `lb_requests_total` (counter): proxied requests by backend and status
//! - `lb_no_backend_total` (counter): requests rejected with no eligible backend
//!
//! Recording is a no-op until a recorder is installed.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_backend_health(backend: &str, alive: bool) {
    metrics::gauge!("lb_backend_health", "backend" => backend.to_string())
        .set(if alive { 1.0 } else { 0.0 });
}

pub fn record_backend_connections(backend: &str, active: usize) {
    metrics::gauge!("lb_backend_active_connections", "backend" => backend.to_string())
        .set(active as f64);
}

pub fn record_request(backend: &str, status: u16) {
    metrics::counter!(
        "lb_requests_total",
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_no_backend() {
    metrics::counter!("lb_no_backend_total").increment(1);
}
