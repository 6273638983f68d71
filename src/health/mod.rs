//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (every guarded call):
//!     CircuitBreaker outcome
//!     → registry record_success / mark_failed
//!     → state.rs (EWMA latency, counters, streak)
//!
//! Active (monitor.rs):
//!     Periodic timer
//!     → Probe each live service concurrently, each with its own timeout
//!     → Same bookkeeping as a guarded call
//! ```
//!
//! # Design Decisions
//! - One monitor task for all services, not one task per service
//! - A probe only ever touches its own service's record
//! - Health state is created on the first connection attempt and never removed

pub mod monitor;
pub mod state;

pub use monitor::{HealthMonitor, SweepSummary};
pub use state::{HealthRecord, HealthSnapshot};
