//! Metrics collection and exposition.
//!
//! # Metrics
//! - `service_status` (gauge): 0=Disabled, 1=Enabled, 2=Fallback, 3=Failed
//! - `service_operations_total` (counter): calls by service, outcome
//! - `service_operation_duration_seconds` (histogram): call latency
//! - `service_fallbacks_total` (counter): fallback values returned
//! - `circuit_breaker_transitions_total` (counter): by service, state
//! - `storage_writes_total` (counter): writes by service, mode
//! - `health_probe_total` (counter): probes by service, result
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::registry::ServiceStatus;
use crate::storage::StorageMode;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_service_status(service: &str, status: ServiceStatus) {
    gauge!("service_status", "service" => service.to_string()).set(status.code());
}

pub fn record_breaker_transition(service: &str, state: &'static str) {
    counter!("circuit_breaker_transitions_total", "service" => service.to_string(), "state" => state)
        .increment(1);
}

pub fn record_operation(service: &str, outcome: &'static str, elapsed: Duration) {
    counter!("service_operations_total", "service" => service.to_string(), "outcome" => outcome).increment(1);
    if outcome != "rejected" {
        histogram!("service_operation_duration_seconds", "service" => service.to_string())
            .record(elapsed.as_secs_f64());
    }
}

pub fn record_fallback(service: &str) {
    counter!("service_fallbacks_total", "service" => service.to_string()).increment(1);
}

pub fn record_storage_write(service: &str, mode: StorageMode) {
    counter!("storage_writes_total", "service" => service.to_string(), "mode" => mode.as_str()).increment(1);
}

pub fn record_probe(service: &str, healthy: bool) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    counter!("health_probe_total", "service" => service.to_string(), "result" => result).increment(1);
}
