//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! ResilienceConfig.services
//!     → descriptor.rs (one ServiceDescriptor per declared service)
//!     → service_registry.rs (per-service lock, health record)
//!     ← CircuitBreaker / HealthMonitor / Orchestrator mutate through it
//! ```
//!
//! # Design Decisions
//! - Constructed explicitly by the composition root; no global instance
//! - Entries are independent; no cross-service locking

pub mod descriptor;
pub mod service_registry;

pub use descriptor::{ServiceDescriptor, ServiceStatus};
pub use service_registry::{ServiceRegistry, ServiceStatusView};
