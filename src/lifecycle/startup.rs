//! Startup orchestration.
//!
//! # Phases
//! ```text
//! 1. Configuration: registry built from config; a required service
//!    without a connection is the only fatal error
//! 2. Independent services: initialized concurrently
//! 3. Derived integrations (depends_on): strictly in dependency order,
//!    skipped when their dependency is not Enabled
//! 4. Health monitor started
//! ```
//!
//! Any other failure demotes the service (Fallback, or Disabled when
//! fallback is off), adds a recommendation, and startup continues. A
//! demoted service gets a cooldown window, after which the health monitor
//! runs its initialization again.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::capability::ManagedService;
use crate::config::ResilienceConfig;
use crate::error::{BackendError, ServiceError, ServiceResult};
use crate::health::HealthMonitor;
use crate::lifecycle::Shutdown;
use crate::registry::{ServiceDescriptor, ServiceRegistry, ServiceStatus, ServiceStatusView};
use crate::resilience::CircuitBreaker;

/// Process-level health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Error,
}

/// How one service came out of startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    pub status: ServiceStatus,
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Startup report, built once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializationResult {
    pub services: BTreeMap<String, ServiceOutcome>,
    pub overall_status: OverallStatus,
    pub recommendations: Vec<String>,
    pub startup_duration_ms: u64,
}

/// Operational status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub overall_status: OverallStatus,
    pub services: BTreeMap<String, ServiceStatusView>,
    pub recommendations: Vec<String>,
}

#[derive(Default)]
struct StartupRun {
    outcomes: BTreeMap<String, ServiceOutcome>,
    recommendations: Vec<String>,
}

impl StartupRun {
    fn record(&mut self, name: &str, status: ServiceStatus, detail: Option<String>, elapsed: Duration) {
        self.outcomes.insert(
            name.to_string(),
            ServiceOutcome {
                status,
                detail,
                duration_ms: elapsed.as_millis() as u64,
            },
        );
    }
}

pub struct Orchestrator {
    config: ResilienceConfig,
    registry: Arc<ServiceRegistry>,
    services: Vec<Arc<dyn ManagedService>>,
    shutdown: Shutdown,
    monitor: Mutex<Option<JoinHandle<()>>>,
    report: ArcSwapOption<InitializationResult>,
}

impl Orchestrator {
    pub fn new(config: ResilienceConfig, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            config,
            registry,
            services: Vec::new(),
            shutdown: Shutdown::new(),
            monitor: Mutex::new(None),
            report: ArcSwapOption::empty(),
        }
    }

    /// Phase 1: build the registry. Fails only on a fatal configuration error.
    pub fn from_config(config: ResilienceConfig) -> ServiceResult<Self> {
        let registry = Arc::new(ServiceRegistry::from_config(&config)?);
        Ok(Self::new(config, registry))
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Attach the client for a declared service.
    pub fn register(&mut self, service: Arc<dyn ManagedService>) -> ServiceResult<()> {
        let name = service.name().to_string();
        if !self.registry.contains(&name) {
            return Err(ServiceError::UnknownService(name));
        }
        if self.services.iter().any(|s| s.name() == name) {
            return Err(ServiceError::Configuration {
                service: name,
                reason: "client registered twice".to_string(),
            });
        }
        self.services.push(service);
        Ok(())
    }

    fn client(&self, name: &str) -> Option<&Arc<dyn ManagedService>> {
        self.services.iter().find(|s| s.name() == name)
    }

    /// Bring every service up and start the health monitor.
    ///
    /// Only a fatal error from a required service is returned; every other
    /// failure is folded into the report. A second call returns the first
    /// report.
    pub async fn initialize(&self) -> ServiceResult<InitializationResult> {
        if let Some(existing) = self.report.load_full() {
            return Ok((*existing).clone());
        }

        let started = Instant::now();
        let mut run = StartupRun::default();
        let mut independent = Vec::new();
        let mut derived = Vec::new();

        for name in self.registry.names() {
            let Some(descriptor) = self.registry.get(&name) else {
                continue;
            };
            if !descriptor.connection_present {
                run.record(&name, ServiceStatus::Disabled, Some("not configured".to_string()), Duration::ZERO);
                run.recommendations.push(format!(
                    "{name}: no connection configured, {} features are disabled",
                    descriptor.kind
                ));
                continue;
            }
            match self.client(&name) {
                None => {
                    self.registry.set_status(&name, ServiceStatus::Disabled);
                    run.record(&name, ServiceStatus::Disabled, Some("no client registered".to_string()), Duration::ZERO);
                    run.recommendations
                        .push(format!("{name}: connection configured but no client is registered"));
                }
                Some(client) if descriptor.depends_on.is_some() => derived.push((descriptor, Arc::clone(client))),
                Some(client) => independent.push((descriptor, Arc::clone(client))),
            }
        }

        tracing::info!(count = independent.len(), "Initializing independent services");
        let results = join_all(independent.iter().map(|(_, client)| self.init_one(client.as_ref()))).await;
        for ((descriptor, _), (result, elapsed)) in independent.iter().zip(results) {
            self.settle(&mut run, descriptor, result, elapsed)?;
        }

        let mut pending = derived;
        while !pending.is_empty() {
            let ready = pending.iter().position(|(d, _)| {
                d.depends_on
                    .as_ref()
                    .is_some_and(|dependency| run.outcomes.contains_key(dependency))
            });
            let Some(index) = ready else {
                for (descriptor, _) in pending.drain(..) {
                    let dependency = descriptor.depends_on.unwrap_or_default();
                    self.registry.set_status(&descriptor.name, ServiceStatus::Disabled);
                    run.record(
                        &descriptor.name,
                        ServiceStatus::Disabled,
                        Some(format!("dependency '{dependency}' never initialized")),
                        Duration::ZERO,
                    );
                    run.recommendations
                        .push(format!("{}: skipped, dependency '{dependency}' is unresolved", descriptor.name));
                }
                break;
            };

            let (descriptor, client) = pending.remove(index);
            let dependency = descriptor.depends_on.clone().unwrap_or_default();
            let dependency_status = self.registry.status(&dependency);
            if dependency_status != Some(ServiceStatus::Enabled) {
                let shown = dependency_status.map_or_else(|| "unknown".to_string(), |s| s.to_string());
                tracing::warn!(service = %descriptor.name, dependency = %dependency, status = %shown, "Skipping derived integration");
                self.registry.demote(&descriptor.name, ServiceStatus::Disabled);
                run.record(
                    &descriptor.name,
                    ServiceStatus::Disabled,
                    Some(format!("dependency '{dependency}' is {shown}")),
                    Duration::ZERO,
                );
                run.recommendations.push(format!(
                    "{}: skipped because {dependency} is not available",
                    descriptor.name
                ));
                continue;
            }

            tracing::info!(service = %descriptor.name, dependency = %dependency, "Initializing derived integration");
            let (result, elapsed) = self.init_one(client.as_ref()).await;
            self.settle(&mut run, &descriptor, result, elapsed)?;
        }

        self.start_monitor();

        let overall_status = self.overall_status(run.recommendations.len());
        let result = InitializationResult {
            services: run.outcomes,
            overall_status,
            recommendations: run.recommendations,
            startup_duration_ms: started.elapsed().as_millis() as u64,
        };

        for recommendation in &result.recommendations {
            tracing::warn!(recommendation = %recommendation, "Startup recommendation");
        }
        tracing::info!(
            overall_status = ?result.overall_status,
            duration_ms = result.startup_duration_ms,
            services = result.services.len(),
            "Initialization complete"
        );

        self.report.store(Some(Arc::new(result.clone())));
        Ok(result)
    }

    async fn init_one(&self, client: &dyn ManagedService) -> (ServiceResult<()>, Duration) {
        let started = Instant::now();
        let limit = Duration::from_secs(self.config.startup.service_timeout_secs);
        let result = match timeout(limit, client.initialize()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout {
                service: client.name().to_string(),
                timeout: limit,
            }),
        };
        (result, started.elapsed())
    }

    fn settle(
        &self,
        run: &mut StartupRun,
        descriptor: &ServiceDescriptor,
        result: ServiceResult<()>,
        elapsed: Duration,
    ) -> ServiceResult<()> {
        let name = descriptor.name.as_str();
        match result {
            Ok(()) => {
                let status = self.registry.status(name).unwrap_or(ServiceStatus::Enabled);
                tracing::info!(service = %name, status = %status, duration_ms = elapsed.as_millis() as u64, "Service initialized");
                run.record(name, status, None, elapsed);
            }
            Err(e) if descriptor.required && e.is_fatal() => {
                tracing::error!(service = %name, error = %e, "Fatal error during initialization");
                return Err(e);
            }
            Err(e) => {
                let status = if descriptor.fallback_enabled {
                    ServiceStatus::Fallback
                } else {
                    ServiceStatus::Disabled
                };
                self.registry.demote(name, status);
                tracing::warn!(service = %name, error = %e, status = %status, "Service initialization failed, continuing");
                let cause = if e.is_fatal() { "misconfigured" } else { "unreachable" };
                let recommendation = match status {
                    ServiceStatus::Fallback => {
                        format!("{name}: {} {cause} ({e}), running in fallback mode", descriptor.kind)
                    }
                    _ => format!("{name}: {} {cause} ({e}), disabled", descriptor.kind),
                };
                run.record(name, status, Some(e.to_string()), elapsed);
                run.recommendations.push(recommendation);
            }
        }
        Ok(())
    }

    fn start_monitor(&self) {
        let monitor = Arc::new(
            HealthMonitor::new(
                Arc::clone(&self.registry),
                self.services.clone(),
                self.config.health_check.clone(),
            )
            .with_recovery_timeout(Duration::from_secs(self.config.startup.service_timeout_secs)),
        );
        let handle = monitor.spawn(self.shutdown.subscribe());
        if let Ok(mut slot) = self.monitor.lock() {
            *slot = Some(handle);
        }
    }

    /// Error if a required service is not Enabled; Degraded if an optional
    /// one is not, or recommendations exceed the threshold.
    fn overall_status(&self, recommendations: usize) -> OverallStatus {
        let mut degraded = recommendations > self.config.startup.degraded_threshold;
        for name in self.registry.names() {
            let Some(descriptor) = self.registry.get(&name) else {
                continue;
            };
            if descriptor.status != ServiceStatus::Enabled {
                if descriptor.required {
                    return OverallStatus::Error;
                }
                degraded = true;
            }
        }
        if degraded {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        }
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.registry.status(name) == Some(ServiceStatus::Enabled)
    }

    /// Run `op` against service `name` under its breaker, or return
    /// `fallback`. Unknown names get the fallback without I/O.
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F, fallback: T, deadline: Duration) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        if !self.registry.contains(name) {
            tracing::warn!(service = %name, "Unknown service, returning fallback value");
            return fallback;
        }
        CircuitBreaker::new(Arc::clone(&self.registry), name)
            .call(op, fallback, deadline)
            .await
    }

    /// Live status: overall verdict recomputed from current statuses.
    pub fn status(&self) -> StatusReport {
        let report = self.report.load_full();
        // Drop advice for services that have since recovered.
        let recommendations: Vec<String> = report
            .as_ref()
            .map(|r| r.recommendations.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.split_once(':').map_or(true, |(name, _)| !self.is_available(name)))
            .collect();
        StatusReport {
            overall_status: self.overall_status(recommendations.len()),
            services: self.registry.status_snapshot(),
            recommendations,
        }
    }

    /// The startup report, once `initialize` has run.
    pub fn report(&self) -> Option<Arc<InitializationResult>> {
        self.report.load_full()
    }

    /// Stop the monitor, then release every service in reverse order.
    pub async fn shutdown(&self) {
        if !self.shutdown.trigger() {
            return;
        }
        tracing::info!("Shutting down services");

        let grace = Duration::from_secs(self.config.startup.shutdown_grace_secs);
        let handle = self.monitor.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if timeout(grace, handle).await.is_err() {
                tracing::warn!(grace_secs = grace.as_secs(), "Health monitor did not stop in time, aborting");
                abort.abort();
            }
        }

        for service in self.services.iter().rev() {
            service.shutdown().await;
        }
        tracing::info!("Shutdown complete");
    }
}
