//! Configuration types consumed by the dispatch engine.
//!
//! These are plain serde structs; loading them from files and environment
//! variables is the runtime crate's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// When `false` the breaker is fully transparent.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Failures that open a closed circuit.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Seconds an open circuit waits before allowing a probe.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Successful probes that close a half-open circuit.
    #[serde(default = "default_half_open_max")]
    pub half_open_max: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            threshold: default_threshold(),
            timeout_secs: default_timeout_secs(),
            half_open_max: default_half_open_max(),
        }
    }
}

impl CircuitBreakerConfig {
    /// A configuration with the breaker switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// The open timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_half_open_max() -> u32 {
    3
}

/// Dispatcher defaults. Per-call flags fall back to these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Collect handler failures and keep going.
    #[serde(default)]
    pub graceful: bool,

    /// Fail dispatches of points with no registered handlers.
    #[serde(default)]
    pub strict: bool,

    /// Build a [`DebugInfo`](crate::result::DebugInfo) timeline per dispatch.
    #[serde(default)]
    pub debug: bool,

    /// Queue used by queued handlers that do not name one.
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            graceful: false,
            strict: false,
            debug: false,
            default_queue: default_queue(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

fn default_queue() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{ "graceful": true, "circuit_breaker": { "threshold": 2 } }"#)
                .unwrap();

        assert!(config.graceful);
        assert!(!config.strict);
        assert_eq!(config.default_queue, "default");
        assert_eq!(config.circuit_breaker.threshold, 2);
        assert_eq!(config.circuit_breaker.timeout(), Duration::from_secs(60));
        assert!(config.circuit_breaker.enabled);
    }

    #[test]
    fn test_disabled_breaker() {
        assert!(!CircuitBreakerConfig::disabled().enabled);
    }
}
