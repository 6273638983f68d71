//! Service registry.
//!
//! # Responsibilities
//! - Hold one descriptor and one health record per declared service
//! - Apply failure/recovery transitions
//! - Produce status snapshots for the status surface

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{ResilienceConfig, ServiceKind};
use crate::error::{ServiceError, ServiceResult};
use crate::health::state::{HealthRecord, HealthSnapshot};
use crate::observability::metrics;
use crate::registry::descriptor::{ServiceDescriptor, ServiceStatus};

/// Mutable state of one service, guarded by that service's lock.
#[derive(Debug)]
pub(crate) struct ServiceState {
    pub(crate) descriptor: ServiceDescriptor,
    pub(crate) health: Option<HealthRecord>,
    /// A half-open trial call is outstanding.
    pub(crate) probe_in_flight: bool,
}

impl ServiceState {
    fn health_mut(&mut self) -> &mut HealthRecord {
        let available = self.descriptor.connection_present;
        self.health.get_or_insert_with(|| HealthRecord::new(available))
    }

    pub(crate) fn fail(&mut self, error: &str) -> ServiceStatus {
        self.probe_in_flight = false;
        self.health_mut().record_failure(error);

        let d = &mut self.descriptor;
        d.failure_count += 1;
        if d.failure_count >= d.max_failures {
            if d.status != ServiceStatus::Failed {
                tracing::warn!(
                    service = %d.name,
                    failures = d.failure_count,
                    cooldown_secs = d.cooldown.as_secs(),
                    error = %error,
                    "Circuit opened"
                );
                metrics::record_breaker_transition(&d.name, "open");
            } else {
                tracing::debug!(service = %d.name, error = %error, "Probe failed, circuit re-opened");
            }
            d.status = ServiceStatus::Failed;
            d.retry_after = Some(Instant::now() + d.cooldown);
        }
        d.status
    }

    pub(crate) fn heal(&mut self) -> ServiceStatus {
        self.probe_in_flight = false;
        let was_failed = self.descriptor.status == ServiceStatus::Failed;

        let d = &mut self.descriptor;
        d.failure_count = 0;
        d.retry_after = None;
        d.status = d.resting_status();
        let status = d.status;
        if was_failed {
            tracing::info!(service = %d.name, "Circuit closed");
            metrics::record_breaker_transition(&d.name, "closed");
        }

        let available = self.descriptor.connection_present;
        self.health_mut().reset(available);
        status
    }
}

#[derive(Debug)]
struct ServiceEntry {
    state: Mutex<ServiceState>,
}

impl ServiceEntry {
    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of declared services.
///
/// Each service has its own lock; no operation holds more than one.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one descriptor per configured service.
    ///
    /// Fails only when a required service has no connection configured.
    pub fn from_config(config: &ResilienceConfig) -> ServiceResult<Self> {
        let registry = Self::new();
        for (name, service) in &config.services {
            registry.register(ServiceDescriptor::from_config(name, service, &config.breaker))?;
        }
        Ok(registry)
    }

    /// Add a service.
    pub fn register(&self, descriptor: ServiceDescriptor) -> ServiceResult<()> {
        if descriptor.required && !descriptor.connection_present {
            return Err(ServiceError::Configuration {
                service: descriptor.name.clone(),
                reason: format!("required {} has no connection configured", descriptor.kind),
            });
        }
        if self.services.contains_key(&descriptor.name) {
            return Err(ServiceError::Configuration {
                service: descriptor.name.clone(),
                reason: "registered twice".to_string(),
            });
        }

        tracing::debug!(
            service = %descriptor.name,
            kind = %descriptor.kind,
            status = %descriptor.status,
            required = descriptor.required,
            "Service registered"
        );
        metrics::record_service_status(&descriptor.name, descriptor.status);
        self.services.insert(
            descriptor.name.clone(),
            Arc::new(ServiceEntry {
                state: Mutex::new(ServiceState {
                    descriptor,
                    health: None,
                    probe_in_flight: false,
                }),
            }),
        );
        Ok(())
    }

    /// Run `f` against one service's state under its lock.
    pub(crate) fn with_state<R>(&self, name: &str, f: impl FnOnce(&mut ServiceState) -> R) -> Option<R> {
        // Clone the entry out so the map shard is not held while `f` runs.
        let entry = self.services.get(name).map(|e| Arc::clone(e.value()))?;
        let mut state = entry.lock();
        Some(f(&mut state))
    }

    pub fn get(&self, name: &str) -> Option<ServiceDescriptor> {
        self.with_state(name, |s| s.descriptor.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.with_state(name, |s| s.descriptor.status)
    }

    /// Count one failure; opens the breaker at `max_failures`.
    pub fn mark_failed(&self, name: &str, error: &str) -> Option<ServiceStatus> {
        let status = self.with_state(name, |s| s.fail(error))?;
        metrics::record_service_status(name, status);
        Some(status)
    }

    /// Reset the failure streak and restore the resting status.
    pub fn mark_healthy(&self, name: &str) -> Option<ServiceStatus> {
        let status = self.with_state(name, |s| s.heal())?;
        metrics::record_service_status(name, status);
        Some(status)
    }

    /// `mark_healthy` plus request accounting for a successful call.
    pub fn record_success(&self, name: &str, latency: Duration) -> Option<ServiceStatus> {
        let status = self.with_state(name, |s| {
            let status = s.heal();
            s.health_mut().record_success(latency);
            status
        })?;
        metrics::record_service_status(name, status);
        Some(status)
    }

    /// False while the breaker is open.
    pub fn can_retry(&self, name: &str) -> bool {
        self.with_state(name, |s| {
            let d = &s.descriptor;
            match (d.status, d.retry_after) {
                (ServiceStatus::Failed, Some(at)) => Instant::now() >= at,
                _ => true,
            }
        })
        .unwrap_or(false)
    }

    /// Force a status, e.g. demotion after a failed initialization.
    pub fn set_status(&self, name: &str, status: ServiceStatus) -> Option<ServiceStatus> {
        let previous = self.with_state(name, |s| {
            let previous = s.descriptor.status;
            s.descriptor.status = status;
            if status != ServiceStatus::Failed {
                s.descriptor.retry_after = None;
            }
            previous
        })?;
        if previous != status {
            tracing::info!(service = %name, from = %previous, to = %status, "Service status changed");
        }
        metrics::record_service_status(name, status);
        Some(previous)
    }

    /// Demote after a failed initialization and start a cooldown window.
    ///
    /// Once the window has passed, [`begin_recovery`](Self::begin_recovery)
    /// lets the health monitor run the initialization again.
    pub fn demote(&self, name: &str, status: ServiceStatus) -> Option<ServiceStatus> {
        let previous = self.with_state(name, |s| {
            let d = &mut s.descriptor;
            let previous = d.status;
            d.status = status;
            d.retry_after = Some(Instant::now() + d.cooldown);
            previous
        })?;
        if previous != status {
            tracing::info!(service = %name, from = %previous, to = %status, "Service demoted");
        }
        metrics::record_service_status(name, status);
        Some(previous)
    }

    /// Move a demoted service whose cooldown has passed to `Failed` with an
    /// elapsed window, so the next breaker admission is the half-open trial.
    ///
    /// Returns the status it was demoted to, or `None` when the service is
    /// not demoted, has no connection, or is still cooling down.
    pub fn begin_recovery(&self, name: &str) -> Option<ServiceStatus> {
        let demoted = self
            .with_state(name, |s| {
                let d = &mut s.descriptor;
                let due = matches!(d.status, ServiceStatus::Fallback | ServiceStatus::Disabled)
                    && d.connection_present
                    && d.retry_after.is_some_and(|at| Instant::now() >= at);
                if !due {
                    return None;
                }
                let demoted = d.status;
                d.status = ServiceStatus::Failed;
                s.probe_in_flight = false;
                Some(demoted)
            })
            .flatten()?;
        tracing::info!(service = %name, from = %demoted, "Cooldown elapsed, retrying initialization");
        metrics::record_service_status(name, ServiceStatus::Failed);
        Some(demoted)
    }

    /// Create the health record if this is the first connection attempt.
    pub fn ensure_health(&self, name: &str) {
        self.with_state(name, |s| {
            s.health_mut();
        });
    }

    pub fn health(&self, name: &str) -> Option<HealthRecord> {
        self.with_state(name, |s| s.health.clone()).flatten()
    }

    /// Per-service view for the status surface.
    pub fn status_snapshot(&self) -> BTreeMap<String, ServiceStatusView> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let view = self.with_state(&name, |s| ServiceStatusView::from_state(s))?;
                Some((name, view))
            })
            .collect()
    }

    /// Health snapshots for services that have been dialed at least once.
    pub fn health_snapshot(&self) -> BTreeMap<String, HealthSnapshot> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let snapshot = self
                    .with_state(&name, |s| s.health.as_ref().map(HealthRecord::snapshot))
                    .flatten()?;
                Some((name, snapshot))
            })
            .collect()
    }
}

/// Status surface entry for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatusView {
    pub kind: ServiceKind,
    pub status: ServiceStatus,
    pub required: bool,
    pub failure_count: u32,
    pub max_failures: u32,
    pub retry_in_secs: Option<u64>,
    pub last_error: Option<String>,
    pub avg_latency_ms: Option<f64>,
}

impl ServiceStatusView {
    fn from_state(state: &ServiceState) -> Self {
        let d = &state.descriptor;
        Self {
            kind: d.kind,
            status: d.status,
            required: d.required,
            failure_count: d.failure_count,
            max_failures: d.max_failures,
            retry_in_secs: d.retry_in().map(|r| r.as_secs()),
            last_error: state.health.as_ref().and_then(|h| h.last_error.clone()),
            avg_latency_ms: state.health.as_ref().map(|h| h.average_response_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(descriptor: ServiceDescriptor) -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry.register(descriptor).unwrap();
        registry
    }

    fn database() -> ServiceDescriptor {
        ServiceDescriptor::new("database", ServiceKind::Database)
            .with_connection(true)
            .max_failures(3)
            .cooldown(Duration::from_secs(60))
    }

    #[test]
    fn test_required_without_connection_is_fatal() {
        let registry = ServiceRegistry::new();
        let err = registry
            .register(ServiceDescriptor::new("database", ServiceKind::Database).required(true))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!registry.contains("database"));
    }

    #[test]
    fn test_from_config_reports_required_missing() {
        let raw = r#"
            [services.database]
            kind = "database"
            required = true
        "#;
        let config: ResilienceConfig = toml::from_str(raw).unwrap();
        let err = ServiceRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration { ref service, .. } if service == "database"));
    }

    #[test]
    fn test_optional_without_connection_is_disabled() {
        let registry = registry_with(ServiceDescriptor::new("cache", ServiceKind::Cache));
        assert_eq!(registry.status("cache"), Some(ServiceStatus::Disabled));
        assert!(registry.health("cache").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_failed_opens_at_threshold() {
        let registry = registry_with(database());

        assert_eq!(registry.mark_failed("database", "refused"), Some(ServiceStatus::Enabled));
        assert_eq!(registry.mark_failed("database", "refused"), Some(ServiceStatus::Enabled));
        assert!(registry.can_retry("database"));

        assert_eq!(registry.mark_failed("database", "refused"), Some(ServiceStatus::Failed));
        let descriptor = registry.get("database").unwrap();
        assert_eq!(descriptor.failure_count, 3);
        assert_eq!(descriptor.retry_after, Some(Instant::now() + Duration::from_secs(60)));
        assert!(!registry.can_retry("database"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(registry.can_retry("database"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_healthy_is_idempotent() {
        let registry = registry_with(database());
        registry.mark_healthy("database");
        let first = registry.health("database").unwrap().last_check;

        tokio::time::advance(Duration::from_secs(5)).await;
        registry.mark_healthy("database");

        let descriptor = registry.get("database").unwrap();
        assert_eq!(descriptor.failure_count, 0);
        assert_eq!(descriptor.status, ServiceStatus::Enabled);
        let second = registry.health("database").unwrap().last_check;
        assert_eq!(second - first, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_healthy_closes_breaker() {
        let registry = registry_with(database());
        for _ in 0..3 {
            registry.mark_failed("database", "timeout");
        }
        assert_eq!(registry.status("database"), Some(ServiceStatus::Failed));

        registry.mark_healthy("database");
        let descriptor = registry.get("database").unwrap();
        assert_eq!(descriptor.status, ServiceStatus::Enabled);
        assert_eq!(descriptor.retry_after, None);
        assert_eq!(registry.health("database").unwrap().consecutive_failures, 0);
        assert_eq!(registry.health("database").unwrap().failed_requests, 3);
    }

    #[test]
    fn test_record_success_updates_average() {
        let registry = registry_with(database());
        registry.record_success("database", Duration::from_millis(100));
        registry.record_success("database", Duration::from_millis(200));

        let health = registry.health("database").unwrap();
        assert!((health.average_response_time - 29.0).abs() < 1e-9);
        assert_eq!(health.total_requests, 2);
    }

    #[test]
    fn test_snapshot_lists_every_service() {
        let registry = registry_with(database());
        registry
            .register(ServiceDescriptor::new("cache", ServiceKind::Cache))
            .unwrap();
        registry.mark_failed("database", "refused");

        let snapshot = registry.status_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["database"].failure_count, 1);
        assert_eq!(snapshot["database"].last_error.as_deref(), Some("refused"));
        assert_eq!(snapshot["cache"].status, ServiceStatus::Disabled);
        assert_eq!(snapshot["cache"].avg_latency_ms, None);

        let health = registry.health_snapshot();
        assert!(health.contains_key("database"));
        assert!(!health.contains_key("cache"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_demoted_service_recovers_after_cooldown() {
        let registry = registry_with(database());
        registry.mark_failed("database", "refused");
        registry.demote("database", ServiceStatus::Fallback);
        assert_eq!(registry.status("database"), Some(ServiceStatus::Fallback));
        assert_eq!(registry.begin_recovery("database"), None);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(registry.begin_recovery("database"), Some(ServiceStatus::Fallback));
        assert_eq!(registry.status("database"), Some(ServiceStatus::Failed));
        assert!(registry.can_retry("database"));
        assert_eq!(registry.begin_recovery("database"), None);

        registry.record_success("database", Duration::from_millis(5));
        assert_eq!(registry.status("database"), Some(ServiceStatus::Enabled));
        assert_eq!(registry.status_snapshot()["database"].last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_status_is_not_recovered() {
        let registry = registry_with(database());
        registry.set_status("database", ServiceStatus::Disabled);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(registry.begin_recovery("database"), None);

        let unconfigured = registry_with(ServiceDescriptor::new("cache", ServiceKind::Cache));
        unconfigured.demote("cache", ServiceStatus::Disabled);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(unconfigured.begin_recovery("cache"), None);
    }

    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::new();
        assert_eq!(registry.mark_failed("nope", "x"), None);
        assert!(!registry.can_retry("nope"));
        assert!(registry.get("nope").is_none());
    }
}
