//! Connection management subsystem.
//!
//! # Data Flow
//! ```text
//! initialize():
//!     connect (retries.rs, breaker-gated per attempt)
//!     → liveness query
//!     → feature detection
//!     → pool.rs (bounded, min connections opened eagerly)
//!
//! execute(op, fallback, timeout):
//!     pool absent / breaker open → fallback, zero I/O
//!     else acquire → op under deadline → release (or discard on error)
//! ```
//!
//! # Design Decisions
//! - One manager per pooled dependency; unpooled clients use endpoint.rs
//! - Operation errors never reach the caller of `execute`

pub mod endpoint;
pub mod manager;
pub mod pool;

pub use endpoint::EndpointService;
pub use manager::ConnectionManager;
pub use pool::{Pool, PoolStats, PooledConnection};
