//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and the
//! `depends_on` graph. All errors are collected, not just the first.

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("pool.min_size ({min}) exceeds pool.max_size ({max})")]
    PoolBounds { min: usize, max: usize },

    #[error("service '{service}' depends on undeclared service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("dependency cycle involving service '{0}'")]
    DependencyCycle(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut non_zero = |field: &str, value: u64| {
        if value == 0 {
            errors.push(ValidationError::Zero {
                field: field.to_string(),
            });
        }
    };
    non_zero("retries.max_attempts", config.retries.max_attempts as u64);
    non_zero("pool.max_size", config.pool.max_size as u64);
    non_zero("pool.acquire_timeout_ms", config.pool.acquire_timeout_ms);
    non_zero("timeouts.connect_ms", config.timeouts.connect_ms);
    non_zero("timeouts.operation_ms", config.timeouts.operation_ms);
    non_zero("breaker.max_failures", config.breaker.max_failures as u64);
    non_zero("health_check.interval_secs", config.health_check.interval_secs);
    non_zero("health_check.timeout_ms", config.health_check.timeout_ms);
    for (name, service) in &config.services {
        if let Some(max) = service.max_failures {
            non_zero(&format!("services.{name}.max_failures"), max as u64);
        }
    }

    if config.pool.min_size > config.pool.max_size {
        errors.push(ValidationError::PoolBounds {
            min: config.pool.min_size,
            max: config.pool.max_size,
        });
    }

    for (name, service) in &config.services {
        if let Some(dependency) = &service.depends_on {
            if !config.services.contains_key(dependency) {
                errors.push(ValidationError::UnknownDependency {
                    service: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    for name in config.services.keys() {
        let mut seen = HashSet::new();
        let mut current = name.as_str();
        while let Some(next) = config
            .services
            .get(current)
            .and_then(|s| s.depends_on.as_deref())
        {
            if !seen.insert(current) {
                errors.push(ValidationError::DependencyCycle(name.clone()));
                break;
            }
            current = next;
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
