//! Metrics collection and exposition.
//!
//! # Metrics
//! - `service_admission_shedding` (gauge): 1 while shedding, 0 while accepting
//! - `service_requests_shed_total` (counter): requests rejected with 503
//! - `service_inflight_requests` (gauge): requests currently being served
//! - `service_event_loop_delay_seconds` (gauge): last sampled scheduling delay
//! - `service_migrations_applied_total` (counter): migrations applied by this process
//! - `service_shutdown_forced_total` (counter): drains that hit the grace period

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint on `addr`.
///
/// Must be called from within the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_admission_state(shedding: bool) {
    metrics::gauge!("service_admission_shedding").set(if shedding { 1.0 } else { 0.0 });
}

pub fn record_request_shed() {
    metrics::counter!("service_requests_shed_total").increment(1);
}

pub fn record_inflight(count: usize) {
    metrics::gauge!("service_inflight_requests").set(count as f64);
}

pub fn record_event_loop_delay(delay: Duration) {
    metrics::gauge!("service_event_loop_delay_seconds").set(delay.as_secs_f64());
}

pub fn record_migration_applied() {
    metrics::counter!("service_migrations_applied_total").increment(1);
}

pub fn record_forced_shutdown(escalated: bool) {
    let cause = if escalated { "signal" } else { "grace_period" };
    metrics::counter!("service_shutdown_forced_total", "cause" => cause).increment(1);
}
