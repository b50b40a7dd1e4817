//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define control-plane metrics (events, endpoint churn, watch restarts)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `dynproxy_events_applied_total` (counter): changes applied, by kind
//! - `dynproxy_events_dropped_total` (counter): changes rejected, by kind and error
//! - `dynproxy_snapshot_revision` (gauge): revision of the last snapshot bootstrapped
//! - `dynproxy_endpoint_changes_total` (counter): endpoints added/removed, by backend
//! - `dynproxy_watch_restarts_total` (counter): subscription restarts, by reason
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library code
//!   and tests record unconditionally

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_event_applied(kind: &'static str) {
    metrics::counter!("dynproxy_events_applied_total", "kind" => kind).increment(1);
}

pub fn record_event_dropped(kind: &'static str, error: &'static str) {
    metrics::counter!("dynproxy_events_dropped_total", "kind" => kind, "error" => error)
        .increment(1);
}

pub fn record_snapshot_revision(revision: u64) {
    metrics::gauge!("dynproxy_snapshot_revision").set(revision as f64);
}

pub fn record_endpoint_changes(backend: &str, added: usize, removed: usize) {
    if added > 0 {
        metrics::counter!("dynproxy_endpoint_changes_total", "backend" => backend.to_string(), "op" => "added")
            .increment(added as u64);
    }
    if removed > 0 {
        metrics::counter!("dynproxy_endpoint_changes_total", "backend" => backend.to_string(), "op" => "removed")
            .increment(removed as u64);
    }
}

pub fn record_watch_restart(reason: &'static str) {
    metrics::counter!("dynproxy_watch_restarts_total", "reason" => reason).increment(1);
}
