//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registry, breaker, storage router, health monitor produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every status transition is logged with the service name
//! - Metrics are cheap and silent until a recorder is installed

pub mod logging;
pub mod metrics;
