//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ResilienceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// Connection strings may be supplied through the environment as
/// `<SERVICE_NAME>_URL` (upper-cased, `-` replaced by `_`); a non-empty
/// variable wins over the file.
pub fn load_config(path: &Path) -> Result<ResilienceConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse, apply overrides from `lookup`, and validate.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<ResilienceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: ResilienceConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut ResilienceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for (name, service) in config.services.iter_mut() {
        let key = env_key(name);
        if let Some(value) = lookup(&key).filter(|v| !v.trim().is_empty()) {
            tracing::debug!(service = %name, env = %key, "Connection taken from environment");
            service.connection = Some(value);
        }
    }
}

fn env_key(service: &str) -> String {
    format!("{}_URL", service.to_ascii_uppercase().replace('-', "_"))
}
