//! Service resilience and orchestration layer.
//!
//! Keeps an application serving while the external services it depends on
//! are unconfigured, slow, or down: per-service circuit breakers, pooled
//! connections with retry and backoff, background health probes, sticky
//! storage fallback, and a startup sequencer that only aborts on fatal
//! configuration errors.

// Core state
pub mod config;
pub mod error;
pub mod registry;

// Call path
pub mod capability;
pub mod connection;
pub mod resilience;
pub mod storage;

// Background and process lifecycle
pub mod health;
pub mod lifecycle;

// Cross-cutting concerns
pub mod adapters;
pub mod observability;

pub use config::ResilienceConfig;
pub use error::{BackendError, ServiceError, ServiceResult, Severity};
pub use lifecycle::{InitializationResult, Orchestrator, OverallStatus, Shutdown};
pub use registry::{ServiceRegistry, ServiceStatus};
