//! Unpooled dependency reached through a single client.
//!
//! Push gateways, search clusters, and telemetry sinks hold their own
//! client; all the resilience layer needs from them is a ping.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{ManagedService, Pingable};
use crate::config::ResilienceConfig;
use crate::error::{BackendError, ServiceError, ServiceResult};
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::resilience::retries::retry_with_backoff;
use crate::resilience::{BackoffPolicy, CircuitBreaker};

pub struct EndpointService<P: Pingable> {
    breaker: CircuitBreaker,
    target: P,
    policy: BackoffPolicy,
    connect_timeout: Duration,
}

impl<P: Pingable> EndpointService<P> {
    pub fn new(registry: Arc<ServiceRegistry>, name: impl Into<String>, target: P) -> Self {
        Self {
            breaker: CircuitBreaker::new(registry, name),
            target,
            policy: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_config(mut self, config: &ResilienceConfig) -> Self {
        self.policy = BackoffPolicy::from(&config.retries);
        self.connect_timeout = config.timeouts.connect();
        self
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn target(&self) -> &P {
        &self.target
    }

    /// Run `op` against the client under the breaker, or return `fallback`.
    pub async fn call<T, F, Fut>(&self, op: F, fallback: T, timeout: Duration) -> T
    where
        F: FnOnce(&P) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.breaker.call(|| op(&self.target), fallback, timeout).await
    }
}

#[async_trait]
impl<P: Pingable> ManagedService for EndpointService<P> {
    fn name(&self) -> &str {
        self.breaker.service()
    }

    async fn initialize(&self) -> ServiceResult<()> {
        let name = self.breaker.service();
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

        retry_with_backoff(name, &self.policy, |_| {
            self.breaker.try_call(|| self.target.ping(), self.connect_timeout)
        })
        .await?;
        tracing::info!(service = %name, "Endpoint reachable");
        Ok(())
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.target.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceKind;
    use crate::registry::ServiceDescriptor;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Gateway {
        pings: AtomicU32,
        up: bool,
    }

    #[async_trait]
    impl Pingable for Gateway {
        async fn ping(&self) -> Result<(), BackendError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.up {
                Ok(())
            } else {
                Err(BackendError::Probe("503".into()))
            }
        }
    }

    fn service(up: bool) -> (Arc<ServiceRegistry>, EndpointService<Gateway>) {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .register(ServiceDescriptor::new("push", ServiceKind::RealtimePush).with_connection(true))
            .unwrap();
        let service = EndpointService::new(
            Arc::clone(&registry),
            "push",
            Gateway {
                pings: AtomicU32::new(0),
                up,
            },
        )
        .with_backoff(BackoffPolicy::new(2, 10, 10));
        (registry, service)
    }

    #[tokio::test]
    async fn test_initialize_pings_target() {
        let (registry, service) = service(true);
        service.initialize().await.unwrap();
        assert_eq!(service.target().pings.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status("push"), Some(ServiceStatus::Enabled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_gives_up_after_policy() {
        let (registry, service) = service(false);
        let err = service.initialize().await.unwrap_err();
        assert!(matches!(err, ServiceError::Connection { attempts: 2, .. }));
        assert_eq!(service.target().pings.load(Ordering::SeqCst), 2);
        assert_eq!(registry.get("push").unwrap().failure_count, 2);
    }

    #[tokio::test]
    async fn test_call_returns_fallback_on_error() {
        let (_registry, service) = service(true);
        let value = service
            .call(
                |_gw| async { Err::<u32, _>(BackendError::Operation("rejected".into())) },
                5,
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(value, 5);
    }
}
