//! Declarative per-service record.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::{BreakerConfig, ServiceConfig, ServiceKind};

/// Operating status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceStatus {
    /// Configured and serving.
    Enabled,
    /// Not configured or switched off; never dialed.
    Disabled,
    /// Serving with reduced capability through a secondary path.
    Fallback,
    /// Breaker open after repeated failures.
    Failed,
}

impl ServiceStatus {
    /// Numeric encoding for the status gauge.
    pub fn code(self) -> f64 {
        match self {
            ServiceStatus::Enabled => 1.0,
            ServiceStatus::Fallback => 2.0,
            ServiceStatus::Failed => 3.0,
            ServiceStatus::Disabled => 0.0,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Configuration and breaker state for one service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub kind: ServiceKind,
    pub required: bool,
    pub connection_present: bool,
    pub fallback_enabled: bool,
    pub status: ServiceStatus,
    pub failure_count: u32,
    pub max_failures: u32,
    /// Length of one open-breaker window.
    pub cooldown: Duration,
    pub retry_after: Option<Instant>,
    pub depends_on: Option<String>,
    pub options: BTreeMap<String, String>,
}

pub const DEFAULT_MAX_FAILURES: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

impl ServiceDescriptor {
    /// An optional, unconfigured service with default breaker settings.
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            connection_present: false,
            fallback_enabled: true,
            status: ServiceStatus::Disabled,
            failure_count: 0,
            max_failures: DEFAULT_MAX_FAILURES,
            cooldown: DEFAULT_COOLDOWN,
            retry_after: None,
            depends_on: None,
            options: BTreeMap::new(),
        }
    }

    /// Build from a config entry, applying breaker defaults.
    pub fn from_config(name: &str, config: &ServiceConfig, breaker: &BreakerConfig) -> Self {
        let mut descriptor = Self::new(name, config.kind)
            .with_connection(config.connection_present())
            .required(config.required)
            .fallback(config.fallback_enabled)
            .max_failures(config.max_failures.unwrap_or(breaker.max_failures))
            .cooldown(Duration::from_secs(
                config.cooldown_secs.unwrap_or(breaker.cooldown_secs),
            ));
        descriptor.depends_on = config.depends_on.clone();
        descriptor.options = config.options.clone();
        descriptor
    }

    pub fn with_connection(mut self, present: bool) -> Self {
        self.connection_present = present;
        self.status = self.resting_status();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn max_failures(mut self, max: u32) -> Self {
        self.max_failures = max.max(1);
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on = Some(dependency.into());
        self
    }

    /// Status a healthy service settles into.
    pub fn resting_status(&self) -> ServiceStatus {
        if self.connection_present {
            ServiceStatus::Enabled
        } else {
            ServiceStatus::Disabled
        }
    }

    /// Time left in the open window, if any.
    pub fn retry_in(&self) -> Option<Duration> {
        match (self.status, self.retry_after) {
            (ServiceStatus::Failed, Some(at)) => {
                let now = Instant::now();
                (at > now).then(|| at - now)
            }
            _ => None,
        }
    }
}
