//! Pooled access to one external dependency.
//!
//! # Responsibilities
//! - Initial connect with bounded, jittered retries
//! - Build the pool, run one liveness query, detect optional features
//! - Run operations under the breaker with a deadline, returning the
//!   caller's fallback value instead of an error

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::capability::{Connector, ManagedService};
use crate::config::{PoolConfig, ResilienceConfig, TimeoutConfig};
use crate::connection::pool::{Pool, PoolStats};
use crate::error::{BackendError, ServiceError, ServiceResult};
use crate::observability::metrics;
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::resilience::retries::retry_with_backoff;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{BackoffPolicy, CircuitBreaker};

/// Connection manager for a pooled dependency.
pub struct ConnectionManager<C: Connector> {
    breaker: CircuitBreaker,
    connector: Arc<C>,
    pool: ArcSwapOption<Pool<C>>,
    features: RwLock<HashSet<String>>,
    pool_config: PoolConfig,
    policy: BackoffPolicy,
    timeouts: TimeoutConfig,
    close_grace: Duration,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(registry: Arc<ServiceRegistry>, name: impl Into<String>, connector: C) -> Self {
        Self {
            breaker: CircuitBreaker::new(registry, name),
            connector: Arc::new(connector),
            pool: ArcSwapOption::empty(),
            features: RwLock::new(HashSet::new()),
            pool_config: PoolConfig::default(),
            policy: BackoffPolicy::default(),
            timeouts: TimeoutConfig::default(),
            close_grace: Duration::from_secs(10),
        }
    }

    /// Take pool, retry, and timeout settings from the root config.
    pub fn with_config(mut self, config: &ResilienceConfig) -> Self {
        self.pool_config = config.pool.clone();
        self.policy = BackoffPolicy::from(&config.retries);
        self.timeouts = config.timeouts.clone();
        self.close_grace = Duration::from_secs(config.startup.shutdown_grace_secs);
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool_config = pool;
        self
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn name(&self) -> &str {
        self.breaker.service()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect, verify, and build the pool.
    ///
    /// Every attempt goes through the breaker, so failed attempts count
    /// against the service. Exhaustion is a recoverable `Connection` error.
    pub async fn initialize(&self) -> ServiceResult<()> {
        let name = self.name();
        let registry = self.breaker.registry();
        let descriptor = registry
            .get(name)
            .ok_or_else(|| ServiceError::UnknownService(name.to_string()))?;
        if !descriptor.connection_present {
            return Err(ServiceError::Unavailable {
                service: name.to_string(),
                status: ServiceStatus::Disabled,
            });
        }
        registry.ensure_health(name);

        let connect_timeout = self.timeouts.connect();
        let conn = retry_with_backoff(name, &self.policy, |_| {
            self.breaker.try_call(|| self.connector.connect(), connect_timeout)
        })
        .await?;

        if let Err(e) = self
            .breaker
            .try_call(|| self.connector.probe(&conn), connect_timeout)
            .await
        {
            self.connector.close(conn).await;
            return Err(e);
        }

        let features = match with_deadline(name, connect_timeout, self.connector.detect_features(&conn)).await {
            Ok(features) => features,
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "Feature detection failed, optional features off");
                HashSet::new()
            }
        };
        self.set_features(features);

        let pool = Pool::build(name, Arc::clone(&self.connector), conn, &self.pool_config, connect_timeout).await;
        let stats = pool.stats();
        self.pool.store(Some(Arc::new(pool)));

        tracing::info!(
            service = %name,
            idle = stats.idle,
            max_size = stats.max_size,
            features = ?self.features(),
            "Connection pool ready"
        );
        Ok(())
    }

    /// Re-probe optional capabilities on a pooled connection.
    pub async fn feature_detection(&self) -> HashSet<String> {
        let Some(pool) = self.pool.load_full() else {
            return HashSet::new();
        };
        let mut conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(service = %self.name(), error = %e, "Feature detection skipped");
                return self.features_set();
            }
        };
        match with_deadline(self.name(), self.timeouts.connect(), self.connector.detect_features(&*conn)).await {
            Ok(features) => {
                conn.recycle();
                self.set_features(features.clone());
                features
            }
            Err(e) => {
                tracing::warn!(service = %self.name(), error = %e, "Feature detection failed");
                self.features_set()
            }
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features
            .read()
            .map(|f| f.contains(feature))
            .unwrap_or(false)
    }

    /// Detected features, sorted.
    pub fn features(&self) -> Vec<String> {
        let mut features: Vec<String> = self.features_set().into_iter().collect();
        features.sort();
        features
    }

    fn features_set(&self) -> HashSet<String> {
        self.features.read().map(|f| f.clone()).unwrap_or_default()
    }

    fn set_features(&self, features: HashSet<String>) {
        if let Ok(mut current) = self.features.write() {
            *current = features;
        }
    }

    /// Pool built and service Enabled.
    pub fn is_available(&self) -> bool {
        self.pool.load().is_some()
            && self.breaker.registry().status(self.name()) == Some(ServiceStatus::Enabled)
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.load_full().map(|pool| pool.stats())
    }

    /// Run `op` on a pooled connection, or return `fallback`.
    ///
    /// No I/O happens when the pool is absent or the breaker is open. A
    /// connection that saw an error or a timeout is discarded.
    pub async fn execute<T, F>(&self, op: F, fallback: T, timeout: Duration) -> T
    where
        F: for<'c> FnOnce(&'c C::Connection) -> BoxFuture<'c, Result<T, BackendError>>,
    {
        match self.try_execute(op, timeout).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(service = %self.name(), reason = %e, "Returning fallback value");
                metrics::record_fallback(self.name());
                fallback
            }
        }
    }

    /// Like [`execute`](Self::execute), but surfaces the error.
    pub async fn try_execute<T, F>(&self, op: F, timeout: Duration) -> ServiceResult<T>
    where
        F: for<'c> FnOnce(&'c C::Connection) -> BoxFuture<'c, Result<T, BackendError>>,
    {
        let Some(pool) = self.pool.load_full() else {
            return Err(ServiceError::Unavailable {
                service: self.name().to_string(),
                status: self
                    .breaker
                    .registry()
                    .status(self.name())
                    .unwrap_or(ServiceStatus::Disabled),
            });
        };

        self.breaker
            .try_call(
                move || async move {
                    let mut conn = pool
                        .acquire()
                        .await
                        .map_err(|e| BackendError::Operation(e.to_string()))?;
                    let result = op(&*conn).await;
                    if result.is_ok() {
                        conn.recycle();
                    }
                    result
                },
                timeout,
            )
            .await
    }

    /// Run `op` only if the server advertised `feature`.
    pub async fn execute_with_feature<T, F>(&self, feature: &str, op: F, fallback: T, timeout: Duration) -> T
    where
        F: for<'c> FnOnce(&'c C::Connection) -> BoxFuture<'c, Result<T, BackendError>>,
    {
        if !self.has_feature(feature) {
            tracing::debug!(service = %self.name(), feature = %feature, "Feature unavailable, skipping call");
            return fallback;
        }
        self.execute(op, fallback, timeout).await
    }

    /// Detach the pool and close it once in-flight operations finish.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.swap(None) {
            if !pool.close(self.close_grace).await {
                tracing::warn!(service = %self.name(), "Pool closed with operations still in flight");
            }
        }
    }
}

#[async_trait]
impl<C: Connector> ManagedService for ConnectionManager<C> {
    fn name(&self) -> &str {
        self.breaker.service()
    }

    async fn initialize(&self) -> ServiceResult<()> {
        ConnectionManager::initialize(self).await
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let pool = self
            .pool
            .load_full()
            .ok_or_else(|| BackendError::Probe("pool not initialized".to_string()))?;
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| BackendError::Probe(e.to_string()))?;
        self.connector.probe(&*conn).await?;
        conn.recycle();
        Ok(())
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}
