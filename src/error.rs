//! Error taxonomy for the resilience layer.
//!
//! Every error is tagged with a [`Severity`]. Only a fatal error may abort
//! startup; everything else is absorbed into health state by the caller.

use std::time::Duration;

use thiserror::Error;

use crate::registry::ServiceStatus;

/// Whether an error must stop the process or can be absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Startup cannot continue.
    Fatal,
    /// Recorded in health state; the application keeps serving.
    Recoverable,
}

/// Errors raised by the resilience layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required service has no connection information.
    #[error("configuration error for '{service}': {reason}")]
    Configuration { service: String, reason: String },

    /// Initial connect or pool creation failed after all retries.
    #[error("connection to '{service}' failed after {attempts} attempt(s): {reason}")]
    Connection {
        service: String,
        attempts: u32,
        reason: String,
    },

    /// An in-flight call exceeded its deadline.
    #[error("operation on '{service}' timed out after {}ms", .timeout.as_millis())]
    Timeout { service: String, timeout: Duration },

    /// An in-flight call returned an error.
    #[error("operation on '{service}' failed: {source}")]
    Operation {
        service: String,
        #[source]
        source: BackendError,
    },

    /// The breaker is open; no I/O was attempted.
    #[error("circuit open for '{service}', retry in {}s", .retry_in.as_secs())]
    CircuitOpen { service: String, retry_in: Duration },

    /// The service is disabled or demoted; the primary path is not dialed.
    #[error("service '{service}' is not serving ({status})")]
    Unavailable {
        service: String,
        status: ServiceStatus,
    },

    /// The name was never declared in configuration.
    #[error("service '{0}' is not registered")]
    UnknownService(String),

    /// Both primary and local storage paths failed.
    #[error("storage error for '{service}': {reason}")]
    Storage { service: String, reason: String },
}

impl ServiceError {
    /// Classify this error for the startup sequencer.
    pub fn severity(&self) -> Severity {
        match self {
            ServiceError::Configuration { .. } => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Whether another connect attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Connection { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Operation { .. }
        )
    }
}

/// Result type for resilience operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors reported by capability adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("{0}")]
    Operation(String),

    #[error("capability '{0}' not supported")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        let fatal = ServiceError::Configuration {
            service: "database".into(),
            reason: "no connection configured".into(),
        };
        assert!(fatal.is_fatal());

        let recoverable = [
            ServiceError::Connection {
                service: "database".into(),
                attempts: 3,
                reason: "refused".into(),
            },
            ServiceError::Timeout {
                service: "cache".into(),
                timeout: Duration::from_millis(250),
            },
            ServiceError::CircuitOpen {
                service: "cache".into(),
                retry_in: Duration::from_secs(30),
            },
            ServiceError::UnknownService("search".into()),
        ];
        for err in recoverable {
            assert_eq!(err.severity(), Severity::Recoverable, "{err}");
        }
    }

    #[test]
    fn test_error_display() {
        let err = ServiceError::Timeout {
            service: "cache".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "operation on 'cache' timed out after 250ms");

        let err = ServiceError::Operation {
            service: "database".into(),
            source: BackendError::Operation("relation missing".into()),
        };
        assert_eq!(err.to_string(), "operation on 'database' failed: relation missing");
    }
}
