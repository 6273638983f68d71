//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call into a dependency:
//!     → circuit_breaker.rs (admit, or return the fallback with zero I/O)
//!     → timeouts.rs (every call has a deadline)
//!     → outcome recorded on the service's registry entry
//!
//! Initial connect:
//!     → retries.rs (bounded attempts)
//!     → backoff.rs (exponential delay, capped, jittered)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A timeout is bookkept exactly like a failed call
//! - Breaker state lives in the registry, not in the handle

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{BreakerPermit, BreakerState, CircuitBreaker};
