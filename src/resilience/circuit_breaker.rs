//! Per-service circuit breaker.
//!
//! # States
//! - Closed: service Enabled, calls pass through
//! - Open: service Failed inside its cooldown, calls return the fallback
//! - Half-Open: cooldown elapsed, exactly one trial call is admitted
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= max_failures
//! Open → Half-Open: now >= retry_after
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (new window, same length)
//! ```
//!
//! The breaker keeps no state of its own; it is a view over the service's
//! registry entry, so every handle for the same service agrees.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{BackendError, ServiceError, ServiceResult};
use crate::observability::metrics;
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::resilience::timeouts::with_deadline;

/// Logical breaker state derived from the service descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open { retry_in: Duration },
    HalfOpen,
}

/// Breaker handle for one service.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    registry: Arc<ServiceRegistry>,
    service: String,
}

impl CircuitBreaker {
    pub fn new(registry: Arc<ServiceRegistry>, service: impl Into<String>) -> Self {
        Self {
            registry,
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Current state; `Closed` for unknown or non-failed services.
    pub fn state(&self) -> BreakerState {
        self.registry
            .with_state(&self.service, |s| {
                let d = &s.descriptor;
                match (d.status, d.retry_after) {
                    (ServiceStatus::Failed, Some(at)) if Instant::now() < at => BreakerState::Open {
                        retry_in: at - Instant::now(),
                    },
                    (ServiceStatus::Failed, _) => BreakerState::HalfOpen,
                    _ => BreakerState::Closed,
                }
            })
            .unwrap_or(BreakerState::Closed)
    }

    /// Ask to make one call.
    ///
    /// Succeeds for an Enabled service, or once per window for a Failed
    /// service whose cooldown has elapsed. Disabled and Fallback services are
    /// never admitted.
    pub fn try_acquire(&self) -> ServiceResult<BreakerPermit<'_>> {
        let admission = self
            .registry
            .with_state(&self.service, |s| {
                let status = s.descriptor.status;
                match status {
                    ServiceStatus::Enabled => Ok(false),
                    ServiceStatus::Disabled | ServiceStatus::Fallback => Err(ServiceError::Unavailable {
                        service: self.service.clone(),
                        status,
                    }),
                    ServiceStatus::Failed => {
                        let now = Instant::now();
                        match s.descriptor.retry_after {
                            Some(at) if now < at => Err(ServiceError::CircuitOpen {
                                service: self.service.clone(),
                                retry_in: at - now,
                            }),
                            _ if s.probe_in_flight => Err(ServiceError::CircuitOpen {
                                service: self.service.clone(),
                                retry_in: Duration::ZERO,
                            }),
                            _ => {
                                s.probe_in_flight = true;
                                Ok(true)
                            }
                        }
                    }
                }
            })
            .ok_or_else(|| ServiceError::UnknownService(self.service.clone()))??;

        if admission {
            tracing::info!(service = %self.service, "Circuit half-open, admitting trial call");
            metrics::record_breaker_transition(&self.service, "half_open");
        }
        Ok(BreakerPermit {
            breaker: self,
            probe: admission,
            settled: false,
        })
    }

    /// Run `op` under the breaker and `timeout`.
    ///
    /// `op` is not invoked at all when the breaker rejects the call.
    pub async fn try_call<T, F, Fut>(&self, op: F, timeout: Duration) -> ServiceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                metrics::record_operation(&self.service, "rejected", Duration::ZERO);
                return Err(e);
            }
        };

        let started = Instant::now();
        let result = with_deadline(&self.service, timeout, op()).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                metrics::record_operation(&self.service, "success", elapsed);
                permit.succeed(elapsed);
            }
            Err(e) => {
                let outcome = if matches!(e, ServiceError::Timeout { .. }) { "timeout" } else { "error" };
                metrics::record_operation(&self.service, outcome, elapsed);
                tracing::warn!(service = %self.service, error = %e, "Operation failed");
                permit.fail(&e.to_string());
            }
        }
        result
    }

    /// Like [`try_call`](Self::try_call), but absorbs every error into
    /// `fallback`.
    pub async fn call<T, F, Fut>(&self, op: F, fallback: T, timeout: Duration) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match self.try_call(op, timeout).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(service = %self.service, reason = %e, "Returning fallback value");
                metrics::record_fallback(&self.service);
                fallback
            }
        }
    }
}

/// Admission for one call. Must be settled with [`succeed`](Self::succeed)
/// or [`fail`](Self::fail); dropping an unsettled trial permit frees the
/// half-open slot without recording an outcome.
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// True for the single half-open trial call.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self, latency: Duration) {
        self.settled = true;
        self.breaker.registry.record_success(&self.breaker.service, latency);
    }

    pub fn fail(mut self, error: &str) {
        self.settled = true;
        self.breaker.registry.mark_failed(&self.breaker.service, error);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.registry.with_state(&self.breaker.service, |s| {
                s.probe_in_flight = false;
            });
        }
    }
}
