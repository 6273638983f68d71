//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience layer. All types derive Serde traits for deserialization from
//! config files.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Declared external services, keyed by service name.
    pub services: BTreeMap<String, ServiceConfig>,

    /// Background health probe settings.
    pub health_check: HealthCheckConfig,

    /// Initial connect retry settings.
    pub retries: RetryConfig,

    /// Pool sizing for pooled dependencies.
    pub pool: PoolConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Circuit breaker defaults, overridable per service.
    pub breaker: BreakerConfig,

    /// Startup sequencing settings.
    pub startup: StartupConfig,

    /// Local fallback storage settings.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// What kind of dependency a service is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Database,
    Cache,
    ObjectStorage,
    MessageQueue,
    RealtimePush,
    Search,
    Telemetry,
    #[default]
    Other,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceKind::Database => "database",
            ServiceKind::Cache => "cache",
            ServiceKind::ObjectStorage => "object storage",
            ServiceKind::MessageQueue => "message queue",
            ServiceKind::RealtimePush => "real-time push",
            ServiceKind::Search => "search",
            ServiceKind::Telemetry => "telemetry",
            ServiceKind::Other => "service",
        };
        f.write_str(label)
    }
}

/// One declared external service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub kind: ServiceKind,

    /// Connection string (URL or `host:port`). Absent means unconfigured.
    pub connection: Option<String>,

    /// A required service without a connection aborts startup.
    pub required: bool,

    /// Demote to fallback mode instead of disabling when init fails.
    pub fallback_enabled: bool,

    /// Service whose client must exist before this one initializes.
    pub depends_on: Option<String>,

    /// Overrides `breaker.max_failures`.
    pub max_failures: Option<u32>,

    /// Overrides `breaker.cooldown_secs`.
    pub cooldown_secs: Option<u64>,

    /// Free-form adapter options.
    pub options: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            kind: ServiceKind::Other,
            connection: None,
            required: false,
            fallback_enabled: true,
            depends_on: None,
            max_failures: None,
            cooldown_secs: None,
            options: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// True when a non-blank connection string is configured.
    pub fn connection_present(&self) -> bool {
        self.connection
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the background probe loop.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_ms: 5_000,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry configuration for initial connects.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of connect attempts.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened eagerly at initialization.
    pub min_size: usize,

    /// Upper bound on concurrently checked-out connections.
    pub max_size: usize,

    /// Maximum wait for a free connection in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Timeout configuration for network calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Default operation timeout in milliseconds.
    pub operation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            operation_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub max_failures: u32,

    /// Open window length in seconds.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            cooldown_secs: 300,
        }
    }
}

/// Startup sequencing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Deadline for one service's whole initialization phase in seconds.
    pub service_timeout_secs: u64,

    /// More recommendations than this marks the process degraded.
    pub degraded_threshold: usize,

    /// How long shutdown waits for in-flight probes in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            service_timeout_secs: 60,
            degraded_threshold: 3,
            shutdown_grace_secs: 10,
        }
    }
}

/// Local fallback storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for local fallback writes. `None` disables the disk path.
    pub local_path: Option<String>,

    /// Timeout for a single primary write in milliseconds.
    pub write_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: Some("./data/fallback".to_string()),
            write_timeout_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
