//! # Junction Core
//!
//! The dispatch engine of the Junction extension point framework.
//!
//! Independent pieces of code register typed reactions ([`Handler`]s) to
//! named extensibility moments ([`ExtensionPoint`]s). The engine invokes them
//! in deterministic priority order, with veto, failure isolation and result
//! aggregation layered on top of plain invocation.
//!
//! ## Components
//!
//! - **Registry**: priority-ordered handler storage with tags, groups and
//!   scopes ([`PriorityRegistry`])
//! - **Circuit breaker**: per-handler Closed/Open/HalfOpen fault isolation
//!   ([`CircuitBreaker`], [`CircuitBreakerStore`])
//! - **Result strategies**: folding handler results ([`First`], [`Merge`],
//!   [`Reduce`])
//! - **Pipeline**: sequential transform-and-forward dispatch ([`Pipeline`])
//! - **Dispatcher**: the five dispatch entry points ([`Dispatcher`]),
//!   producing [`DispatchResult`] and [`DebugInfo`] records
//!
//! ## Flow
//!
//! ```text
//! caller ──▶ Dispatcher ──▶ PriorityRegistry (sorted view)
//!               │
//!               ├─ muted? ─────────── skip
//!               ├─ circuit open? ──── skip
//!               ├─ queued? ────────── QueueHandoff
//!               └─ invoke ──▶ CircuitBreaker (success / failure)
//!                     │
//!                     └─ `false` on an interruptible point ── stop
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use junction_core::prelude::*;
//!
//! #[derive(Default)]
//! struct UserSaving {
//!     email: String,
//!     state: InterruptibleState,
//! }
//!
//! impl ExtensionPoint for UserSaving {
//!     fn point_name() -> &'static str {
//!         "user.saving"
//!     }
//!     fn interruption(&self) -> Option<&InterruptibleState> {
//!         Some(&self.state)
//!     }
//!     fn interruption_mut(&mut self) -> Option<&mut InterruptibleState> {
//!         Some(&mut self.state)
//!     }
//! }
//!
//! impl Interruptible for UserSaving {}
//!
//! let registry = Arc::new(PriorityRegistry::new());
//! registry.register(
//!     handler_fn("require-email", |user: &mut UserSaving| !user.email.is_empty()),
//!     priority::CRITICAL,
//! );
//!
//! let dispatcher = Dispatcher::new(registry);
//! let mut user = UserSaving::default();
//! assert!(!dispatcher.dispatch_interruptible(&mut user)?);
//! ```

pub mod breaker;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod notify;
pub mod pipeline;
pub mod point;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod result;
pub mod strategy;
pub mod validator;

// Re-export point and handler types
pub use handler::{
    BoxedHandler, ErasedHandler, FnHandler, Handler, HandlerId, HandlerResult, IntoHandlerOutput,
    handler_fn, into_handler, priority,
};
pub use point::{ExtensionPoint, Interruptible, InterruptibleState, PointKey};

// Re-export engine types
pub use breaker::{
    CircuitBreaker, CircuitBreakerStore, CircuitRecord, CircuitState, Clock, ManualClock,
    MemoryStore, SystemClock,
};
pub use config::{CircuitBreakerConfig, DispatcherConfig};
pub use diagnostics::{DiagnosticsSink, TracingSink};
pub use dispatcher::{DispatchCall, Dispatcher};
pub use notify::{EventBus, Notifier};
pub use pipeline::{BoxedPipe, Next, Pipe, Pipeline, pipe_fn};
pub use queue::{MemoryQueue, QueueHandoff, QueueOptions, QueuedCall};
pub use registry::{
    EntryHandle, GroupRegistrar, HandlerEntry, HandlerList, HandlerRef, PriorityRegistry,
    RegistryStats, ScopeId,
};
pub use resolver::{FactoryResolver, Resolver};
pub use result::{DebugInfo, DispatchResult, Outcome, SkipReason, TimelineEntry};
pub use strategy::{First, Merge, Reduce, ResultStrategy};

// Re-export error types
pub use error::{
    BoxError, DispatchError, DispatchOutcome, HandlerFailure, PipelineError, QueueError,
    RegistryError, RegistryResult,
};

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        DispatchError, DispatchResult, Dispatcher, ExtensionPoint, First, Handler, HandlerId,
        HandlerResult, Interruptible, InterruptibleState, Merge, Pipeline, PriorityRegistry,
        QueueOptions, Reduce, ResultStrategy, SkipReason, handler_fn, priority,
    };
}
