//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, environment overrides)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → ServiceRegistry::from_config builds one descriptor per service
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BreakerConfig, HealthCheckConfig, ObservabilityConfig, PoolConfig, ResilienceConfig,
    RetryConfig, ServiceConfig, ServiceKind, StartupConfig, StorageConfig, TimeoutConfig,
};
