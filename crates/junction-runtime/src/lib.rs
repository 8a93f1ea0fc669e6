//! Junction Runtime - the ambient stack around the dispatch engine.
//!
//! This crate provides:
//! - Layered configuration loading and validation (`config`)
//! - `tracing-subscriber` setup driven by that configuration (`logging`)
//! - A tokio queue substrate for queued handlers (`TokioQueue`)
//! - One-call assembly of registry, dispatcher and queue (`Junction`)
//!
//! ```rust,ignore
//! use junction_runtime::{Junction, config::ConfigLoader, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging)?;
//!
//!     let junction = Junction::from_config(&config)?;
//!     // register handlers, dispatch points...
//!     junction.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod junction;
pub mod logging;
pub mod queue;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, JunctionConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use junction::Junction;
pub use logging::{LoggingBuilder, SpanEvents};
pub use queue::{QueueStats, TokioQueue};

// Re-export tracing for use by handler crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros, for glob import.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
