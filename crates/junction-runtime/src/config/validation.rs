//! Configuration validation utilities.

use junction_core::CircuitBreakerConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{JunctionConfig, LogFormat, LogOutput, LoggingConfig, QueueSettings};

/// Validates the entire configuration.
///
/// Log levels are checked while parsing; unknown names never reach here.
pub fn validate_config(config: &JunctionConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_circuit_breaker(&config.circuit_breaker)?;
    validate_queue(&config.queue)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if cfg!(not(feature = "json-log")) && logging.format == LogFormat::Json {
        return Err(ConfigError::validation(
            "JSON log format requires the `json-log` feature",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter has an empty module name: {module:?}"
        )));
    }

    Ok(())
}

fn validate_circuit_breaker(breaker: &CircuitBreakerConfig) -> ConfigResult<()> {
    if breaker.threshold == 0 {
        return Err(ConfigError::validation(
            "Circuit breaker threshold must be at least 1",
        ));
    }

    if breaker.half_open_max == 0 {
        return Err(ConfigError::validation(
            "Circuit breaker half_open_max must be at least 1",
        ));
    }

    if breaker.timeout_secs == 0 {
        return Err(ConfigError::validation(
            "Circuit breaker timeout must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_queue(queue: &QueueSettings) -> ConfigResult<()> {
    if queue.default_queue.trim().is_empty() {
        return Err(ConfigError::missing_field("queue.default_queue"));
    }

    if queue.capacity == 0 {
        return Err(ConfigError::validation(
            "Queue capacity must be greater than 0",
        ));
    }

    Ok(())
}
