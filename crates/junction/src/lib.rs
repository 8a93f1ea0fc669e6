//! # Junction
//!
//! Priority-ordered extension point dispatch for Rust.
//!
//! ## Overview
//!
//! An *extension point* is a typed value describing a moment other code may
//! react to. *Handlers* register against a point type with a priority, and a
//! [`Dispatcher`](core::Dispatcher) invokes them in order. On top of plain
//! invocation the engine offers:
//!
//! - veto: a handler returning `false` stops an interruptible dispatch
//! - graceful mode: failures are collected instead of aborting
//! - per-handler circuit breaking
//! - muting, silencing and out-of-band queued handlers
//! - result aggregation ([`First`](core::First), [`Merge`](core::Merge),
//!   [`Reduce`](core::Reduce)) and a transform [`Pipeline`](core::Pipeline)
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌────────────┐     ┌──────────────────┐
//! │ JunctionConfig │────▶│  Junction  │────▶│ PriorityRegistry │◀── register*()
//! └────────────────┘     │            │     └──────────────────┘
//!                        │ Dispatcher │────▶ handlers (priority order)
//!                        │            │────▶ TokioQueue (queued handlers)
//!                        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use junction::prelude::*;
//!
//! #[derive(Clone, Default, ExtensionPoint)]
//! #[extension_point(name = "user.saving")]
//! struct UserSaving {
//!     email: String,
//!     #[extension_point(interruptible)]
//!     state: InterruptibleState,
//! }
//!
//! let junction = Junction::from_config(&JunctionConfig::default())?;
//! junction.registry().register(
//!     handler_fn("require-email", |u: &mut UserSaving| !u.email.is_empty()),
//!     priority::CRITICAL,
//! );
//!
//! let mut user = UserSaving::default();
//! let saved = junction.dispatcher().dispatch_interruptible(&mut user)?;
//! assert!(!saved);
//! ```
//!
//! The derive expands to paths under `::junction_core`. Hosts that only
//! depend on this crate point it here instead with
//! `#[extension_point(crate = "junction::core")]`.
//!
//! ## Features
//!
//! - `macros` *(default)*: the `ExtensionPoint` derive
//! - `toml-config` *(default)* / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output

pub use junction_core as core;
pub use junction_runtime as runtime;

#[cfg(feature = "macros")]
pub use junction_macros::ExtensionPoint;

/// Commonly used types, for glob import.
///
/// ```rust,ignore
/// use junction::prelude::*;
/// ```
pub mod prelude {
    // Engine
    pub use junction_core::prelude::*;
    pub use junction_core::{
        CircuitBreaker, CircuitState, DispatchOutcome, EventBus, QueueHandoff, SkipReason,
    };

    // Runtime assembly
    pub use junction_runtime::{ConfigLoader, Junction, JunctionConfig, TokioQueue};

    #[cfg(feature = "macros")]
    pub use junction_macros::ExtensionPoint;
}
