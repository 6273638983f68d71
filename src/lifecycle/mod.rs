//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Registry from config → independent services → derived integrations
//!     → health monitor
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop monitor (bounded wait) → close services
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Startup never aborts on a recoverable error
//! - Services close in reverse registration order
//! - Shutdown has a grace deadline, after which the monitor is aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{InitializationResult, Orchestrator, OverallStatus, ServiceOutcome, StatusReport};
