//! Per-service health record.
//!
//! # Design Decisions
//! - Created lazily on the first connection attempt, never dropped
//! - Request counters are monotonic for the process lifetime
//! - Response time is an EWMA updated only by successful calls

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::time::Instant;

/// Weight of the newest sample in the response-time average.
pub const EWMA_WEIGHT: f64 = 0.1;

/// Health bookkeeping for one service.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub is_available: bool,
    pub last_check: Instant,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Milliseconds.
    pub average_response_time: f64,
}

impl HealthRecord {
    pub fn new(is_available: bool) -> Self {
        Self {
            is_available,
            last_check: Instant::now(),
            last_error: None,
            consecutive_failures: 0,
            total_requests: 0,
            failed_requests: 0,
            average_response_time: 0.0,
        }
    }

    /// Count a successful call and fold its latency into the average.
    pub fn record_success(&mut self, latency: Duration) {
        let sample = latency.as_micros() as f64 / 1000.0;
        self.average_response_time =
            self.average_response_time * (1.0 - EWMA_WEIGHT) + sample * EWMA_WEIGHT;
        self.total_requests += 1;
        self.reset(true);
    }

    /// Count a failed call.
    pub fn record_failure(&mut self, error: &str) {
        self.is_available = false;
        self.last_check = Instant::now();
        self.last_error = Some(error.to_string());
        self.consecutive_failures += 1;
        self.total_requests += 1;
        self.failed_requests += 1;
    }

    /// Clear the failure streak and the last error. Counters and the
    /// average are kept.
    pub fn reset(&mut self, available: bool) {
        self.is_available = available;
        self.last_check = Instant::now();
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    /// Fraction of successful requests; 1.0 before any request.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            available: self.is_available,
            last_check_unix_ms: unix_millis(self.last_check),
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate(),
            avg_response_time_ms: self.average_response_time,
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time view of a [`HealthRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub available: bool,
    pub last_check_unix_ms: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub last_error: Option<String>,
}

/// Map a monotonic instant onto wall-clock milliseconds.
pub(crate) fn unix_millis(instant: Instant) -> u64 {
    let age = Instant::now().saturating_duration_since(instant);
    SystemTime::now()
        .checked_sub(age)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
