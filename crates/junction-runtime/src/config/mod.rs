//! Layered configuration for a Junction host.
//!
//! Files, `JUNCTION_*` environment variables and programmatic overrides are
//! merged by [`ConfigLoader`] into a [`JunctionConfig`], then checked by
//! [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    DispatcherSettings, JunctionConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    QueueSettings, SpanEventConfig,
};
pub use validation::validate_config;
