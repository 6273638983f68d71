//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every live service
//! - Update each service's own record from the probe outcome
//!
//! - Re-run initialization for services demoted at startup once their
//!   cooldown has passed
//!
//! A service is live when the breaker would admit a call: Enabled, or
//! Failed with its cooldown elapsed, in which case the probe is the
//! half-open trial.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::capability::ManagedService;
use crate::config::HealthCheckConfig;
use crate::health::state::HealthSnapshot;
use crate::observability::metrics;
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::resilience::CircuitBreaker;

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub probed: usize,
    pub healthy: usize,
    pub skipped: usize,
}

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    services: Vec<Arc<dyn ManagedService>>,
    config: HealthCheckConfig,
    recovery_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        services: Vec<Arc<dyn ManagedService>>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            registry,
            services,
            config,
            recovery_timeout: Duration::from_secs(30),
        }
    }

    /// Deadline for one re-initialization of a demoted service.
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Run on a background task until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        let interval = self.config.interval();
        tracing::info!(
            interval_secs = interval.as_secs(),
            services = self.services.len(),
            "Health monitor starting"
        );

        // Initialization just touched every service; first sweep waits a full period.
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.check_all().await;
                    tracing::debug!(
                        probed = summary.probed,
                        healthy = summary.healthy,
                        skipped = summary.skipped,
                        "Health sweep complete"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe all live services concurrently.
    pub async fn check_all(&self) -> SweepSummary {
        let outcomes = join_all(self.services.iter().map(|service| self.check_one(service.as_ref()))).await;

        let mut summary = SweepSummary::default();
        for outcome in outcomes {
            match outcome {
                Some(true) => {
                    summary.probed += 1;
                    summary.healthy += 1;
                }
                Some(false) => summary.probed += 1,
                None => summary.skipped += 1,
            }
        }
        summary
    }

    /// `None` when the service is not live and was left alone.
    async fn check_one(&self, service: &dyn ManagedService) -> Option<bool> {
        let name = service.name();
        if service.recovers_automatically() && self.dependency_ready(name) {
            if let Some(demoted) = self.registry.begin_recovery(name) {
                return Some(self.recover(service, demoted).await);
            }
        }

        let breaker = CircuitBreaker::new(Arc::clone(&self.registry), name);
        let permit = breaker.try_acquire().ok()?;

        let probe_timeout = self.config.timeout();
        let started = Instant::now();
        let outcome = time::timeout(probe_timeout, service.probe()).await;
        let healthy = match outcome {
            Ok(Ok(())) => {
                if permit.is_probe() {
                    tracing::info!(service = %name, "Half-open probe succeeded");
                }
                permit.succeed(started.elapsed());
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %name, error = %e, "Health probe failed");
                permit.fail(&e.to_string());
                false
            }
            Err(_) => {
                tracing::warn!(service = %name, timeout_ms = probe_timeout.as_millis() as u64, "Health probe timed out");
                permit.fail(&format!("probe timed out after {}ms", probe_timeout.as_millis()));
                false
            }
        };
        metrics::record_probe(name, healthy);
        Some(healthy)
    }

    fn dependency_ready(&self, name: &str) -> bool {
        match self.registry.get(name).and_then(|d| d.depends_on) {
            Some(dependency) => self.registry.status(&dependency) == Some(ServiceStatus::Enabled),
            None => true,
        }
    }

    /// Run startup again for a demoted service. On failure it goes back to
    /// `demoted` with a fresh cooldown.
    async fn recover(&self, service: &dyn ManagedService, demoted: ServiceStatus) -> bool {
        let name = service.name();
        let recovered = match time::timeout(self.recovery_timeout, service.initialize()).await {
            Ok(Ok(())) => {
                self.registry.mark_healthy(name);
                tracing::info!(service = %name, "Service recovered");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %name, error = %e, status = %demoted, "Recovery failed, staying demoted");
                false
            }
            Err(_) => {
                tracing::warn!(
                    service = %name,
                    timeout_secs = self.recovery_timeout.as_secs(),
                    "Recovery timed out, staying demoted"
                );
                false
            }
        };
        if !recovered {
            self.registry.demote(name, demoted);
        }
        metrics::record_probe(name, recovered);
        recovered
    }

    pub fn snapshot(&self) -> BTreeMap<String, HealthSnapshot> {
        self.registry.health_snapshot()
    }

    pub fn interval(&self) -> Duration {
        self.config.interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceKind;
    use crate::error::{BackendError, ServiceError, ServiceResult};
    use crate::registry::ServiceDescriptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Probe {
        name: String,
        up: AtomicBool,
        calls: AtomicU32,
        inits: AtomicU32,
        hang: bool,
        sticky: bool,
    }

    impl Probe {
        fn new(name: &str, up: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                up: AtomicBool::new(up),
                calls: AtomicU32::new(0),
                inits: AtomicU32::new(0),
                hang: false,
                sticky: false,
            })
        }
    }

    #[async_trait]
    impl ManagedService for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn initialize(&self) -> ServiceResult<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ServiceError::Connection {
                    service: self.name.clone(),
                    attempts: 1,
                    reason: "connection refused".into(),
                })
            }
        }

        fn recovers_automatically(&self) -> bool {
            !self.sticky
        }

        async fn probe(&self) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BackendError::Probe("PING timed out".into()))
            }
        }
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_secs: 60,
            timeout_ms: 500,
        }
    }

    fn register(registry: &ServiceRegistry, name: &str, connection: bool, max_failures: u32) {
        registry
            .register(
                ServiceDescriptor::new(name, ServiceKind::Cache)
                    .with_connection(connection)
                    .max_failures(max_failures),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_probes_only_live_services() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "cache", true, 5);
        register(&registry, "search", true, 5);
        register(&registry, "telemetry", false, 5);

        let cache = Probe::new("cache", true);
        let search = Probe::new("search", false);
        let telemetry = Probe::new("telemetry", true);
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            vec![
                cache.clone() as Arc<dyn ManagedService>,
                search.clone(),
                telemetry.clone(),
            ],
            config(),
        );

        let summary = monitor.check_all().await;
        assert_eq!(
            summary,
            SweepSummary {
                probed: 2,
                healthy: 1,
                skipped: 1
            }
        );
        assert_eq!(telemetry.calls.load(Ordering::SeqCst), 0);

        let snapshot = monitor.snapshot();
        assert!(snapshot["cache"].available);
        assert!(!snapshot["search"].available);
        assert_eq!(snapshot["search"].consecutive_failures, 1);
        assert!(!snapshot.contains_key("telemetry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_waits_for_cooldown_then_half_opens() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "cache", true, 1);
        let cache = Probe::new("cache", false);
        let monitor = HealthMonitor::new(Arc::clone(&registry), vec![cache.clone() as Arc<dyn ManagedService>], config());

        monitor.check_all().await;
        assert_eq!(registry.status("cache"), Some(ServiceStatus::Failed));

        monitor.check_all().await;
        assert_eq!(cache.calls.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(301)).await;
        cache.up.store(true, Ordering::SeqCst);
        let summary = monitor.check_all().await;
        assert_eq!(summary.healthy, 1);
        assert_eq!(cache.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.status("cache"), Some(ServiceStatus::Enabled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_counts_as_failure() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "search", true, 5);
        let search = Arc::new(Probe {
            name: "search".into(),
            up: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            inits: AtomicU32::new(0),
            hang: true,
            sticky: false,
        });
        let monitor = HealthMonitor::new(Arc::clone(&registry), vec![search as Arc<dyn ManagedService>], config());

        let summary = monitor.check_all().await;
        assert_eq!(summary.probed, 1);
        assert_eq!(summary.healthy, 0);
        let health = registry.health("search").unwrap();
        assert!(health.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_demoted_service_is_reinitialized_after_cooldown() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "database", true, 5);
        registry.demote("database", ServiceStatus::Fallback);
        let database = Probe::new("database", false);
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            vec![database.clone() as Arc<dyn ManagedService>],
            config(),
        );

        assert_eq!(monitor.check_all().await.skipped, 1);
        assert_eq!(database.inits.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(301)).await;
        let summary = monitor.check_all().await;
        assert_eq!((summary.probed, summary.healthy), (1, 0));
        assert_eq!(database.inits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status("database"), Some(ServiceStatus::Fallback));

        // A failed attempt starts a fresh window.
        database.up.store(true, Ordering::SeqCst);
        monitor.check_all().await;
        assert_eq!(database.inits.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(301)).await;
        assert_eq!(monitor.check_all().await.healthy, 1);
        assert_eq!(database.inits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.status("database"), Some(ServiceStatus::Enabled));
        assert_eq!(database.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sticky_service_stays_demoted() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "object-store", true, 5);
        registry.demote("object-store", ServiceStatus::Fallback);
        let store = Arc::new(Probe {
            name: "object-store".into(),
            up: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            inits: AtomicU32::new(0),
            hang: false,
            sticky: true,
        });
        let monitor = HealthMonitor::new(Arc::clone(&registry), vec![store.clone() as Arc<dyn ManagedService>], config());

        time::advance(Duration::from_secs(301)).await;
        assert_eq!(monitor.check_all().await.skipped, 1);
        assert_eq!(store.inits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.status("object-store"), Some(ServiceStatus::Fallback));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(ServiceRegistry::new());
        register(&registry, "cache", true, 5);
        let cache = Probe::new("cache", true);
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            vec![cache.clone() as Arc<dyn ManagedService>],
            config(),
        ));

        let (tx, rx) = broadcast::channel(1);
        let handle = monitor.spawn(rx);

        time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.calls.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
