//! Error types for the dispatch engine.
//!
//! Interruption and an open circuit are deliberately absent: both are
//! ordinary dispatch outcomes recorded on the [`DispatchResult`], not errors.
//!
//! [`DispatchResult`]: crate::result::DispatchResult

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::handler::HandlerId;

/// A boxed error raised by handler or pipe logic.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors raised while registering or validating handlers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The named point type was never declared as an extension point.
    #[error("'{name}' is not a declared extension point")]
    InvalidExtensionPoint {
        /// The rejected point name.
        name: String,
    },

    /// The handler accepts a different point type than it is registered for.
    #[error("handler '{handler}' accepts '{accepts}' but was registered for '{point}'")]
    SignatureMismatch {
        /// The offending handler.
        handler: HandlerId,
        /// The point type the handler declares.
        accepts: &'static str,
        /// The point type it was registered against.
        point: &'static str,
    },

    /// The entry handle does not refer to a live registration.
    #[error("no handler entry with handle {0}")]
    UnknownEntry(u64),
}

// =============================================================================
// Handler Failure
// =============================================================================

/// An uncaught error from a handler's own logic.
///
/// Displays as the original error and exposes it through
/// [`source`](StdError::source), so the failure stays attributable to the
/// handler that raised it.
#[derive(Debug)]
pub struct HandlerFailure {
    handler: HandlerId,
    source: BoxError,
}

impl HandlerFailure {
    /// Creates a failure record for `handler`.
    pub fn new(handler: HandlerId, source: BoxError) -> Self {
        Self { handler, source }
    }

    /// The handler that failed.
    pub fn handler(&self) -> &HandlerId {
        &self.handler
    }

    /// Borrows the original error.
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Unwraps the original error.
    pub fn into_source(self) -> BoxError {
        self.source
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

impl StdError for HandlerFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors that abort a dispatch call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Strict mode is active and nothing is registered for the point.
    #[error("strict mode: no handlers registered for '{point}'")]
    StrictModeViolation {
        /// The dispatched point name.
        point: &'static str,
    },

    /// A handler failed outside graceful mode.
    #[error(transparent)]
    Handler(#[from] HandlerFailure),

    /// A deferred handler reference could not be resolved.
    #[error("handler '{handler}' could not be resolved")]
    Unresolved {
        /// The unresolved handler id.
        handler: HandlerId,
    },

    /// A resolved handler does not accept the dispatched point type.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A queued handler could not be handed to the queue.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl DispatchError {
    /// Returns the failing handler, when the error came from one.
    pub fn handler(&self) -> Option<&HandlerId> {
        match self {
            Self::Handler(failure) => Some(failure.handler()),
            Self::Unresolved { handler } => Some(handler),
            Self::Registry(RegistryError::SignatureMismatch { handler, .. }) => Some(handler),
            Self::Queue(QueueError::NotConfigured(handler)) => Some(handler),
            _ => None,
        }
    }
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pipe failed and `continue_on_failure` was off.
    #[error("pipe #{index} failed: {source}")]
    Pipe {
        /// Zero-based position of the failing pipe.
        index: usize,
        /// The original error.
        #[source]
        source: BoxError,
    },

    /// The destination closure failed.
    #[error("pipeline destination failed: {0}")]
    Destination(#[source] BoxError),
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Errors raised when handing a call to the queue collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// No queue collaborator is configured on the dispatcher.
    #[error("no queue configured for queued handler '{0}'")]
    NotConfigured(HandlerId),

    /// The queue is shut down or no longer accepting work.
    #[error("queue '{0}' is closed")]
    Closed(String),

    /// The queue is at capacity.
    #[error("queue '{0}' is full")]
    Full(String),

    /// The job duplicates a unique key that is still live.
    #[error("duplicate job for unique key '{0}'")]
    Duplicate(String),

    /// The point could not be captured for out-of-band execution.
    #[error("could not capture a '{point}' payload")]
    Payload {
        /// The dispatched point name.
        point: &'static str,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for dispatch operations.
pub type DispatchOutcome<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_handler_failure_is_transparent() {
        let failure = HandlerFailure::new(HandlerId::new("writer"), Box::new(DiskFull));
        assert_eq!(failure.to_string(), "disk full");

        let err = DispatchError::from(failure);
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.handler().map(HandlerId::as_str), Some("writer"));

        let DispatchError::Handler(failure) = err else {
            panic!("expected handler failure");
        };
        assert!(failure.into_source().downcast_ref::<DiskFull>().is_some());
    }

    #[test]
    fn test_strict_violation_message() {
        let err = DispatchError::StrictModeViolation { point: "order.placed" };
        assert_eq!(
            err.to_string(),
            "strict mode: no handlers registered for 'order.placed'"
        );
        assert!(err.handler().is_none());
    }
}
