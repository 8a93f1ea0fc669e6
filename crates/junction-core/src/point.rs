//! Extension point abstractions.
//!
//! An extension point is a plain Rust type that names a dispatch site. The
//! instance passed to a dispatch call carries the data handlers observe and
//! mutate; the caller owns it for the duration of that call.
//!
//! - [`ExtensionPoint`] - Base trait for all dispatchable types
//! - [`PointKey`] - Registry identity of an extension point type
//! - [`InterruptibleState`] - Embeddable veto bookkeeping
//! - [`Interruptible`] - Capability trait for points that support veto
//!
//! # Example
//!
//! ```rust,ignore
//! use junction::prelude::*;
//!
//! #[derive(Clone, ExtensionPoint)]
//! #[extension_point(name = "order.placed")]
//! pub struct OrderPlaced {
//!     pub order_id: u64,
//!     pub errors: Vec<String>,
//!     #[extension_point(interruptible)]
//!     pub state: InterruptibleState,
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::handler::HandlerId;

// ============================================================================
// Core Extension Point Trait
// ============================================================================

/// The base trait for every dispatchable type.
///
/// Implementations are usually generated by `#[derive(ExtensionPoint)]`. The
/// interruption accessors double as the dispatch-time capability check: a
/// point that returns `None` never stops on a `false` result.
pub trait ExtensionPoint: Any + Send + 'static {
    /// Returns the stable, human-readable name of this point type.
    ///
    /// Name-based registration resolves against this value.
    fn point_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Returns the embedded interruption state, if this point supports veto.
    fn interruption(&self) -> Option<&InterruptibleState> {
        None
    }

    /// Mutable access to the embedded interruption state.
    fn interruption_mut(&mut self) -> Option<&mut InterruptibleState> {
        None
    }
}

/// Extension points that support veto.
///
/// Blanket-implemented helpers on top of [`ExtensionPoint::interruption`];
/// implement this marker for points whose interruption accessors return
/// `Some`.
pub trait Interruptible: ExtensionPoint {
    /// Whether a handler vetoed the last dispatch of this point.
    fn is_interrupted(&self) -> bool {
        self.interruption().is_some_and(InterruptibleState::is_interrupted)
    }

    /// The handler that vetoed the last dispatch, if any.
    fn interrupted_by(&self) -> Option<&HandlerId> {
        self.interruption().and_then(InterruptibleState::interrupted_by)
    }
}

// ============================================================================
// Point Key
// ============================================================================

/// Registry identity of an extension point type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointKey {
    type_id: TypeId,
    name: &'static str,
}

impl PointKey {
    /// Returns the key for the extension point type `P`.
    pub fn of<P: ExtensionPoint>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            name: P::point_name(),
        }
    }

    /// The `TypeId` of the point type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The declared name of the point type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ============================================================================
// Interruptible State
// ============================================================================

/// Veto bookkeeping embedded into interruptible extension points.
///
/// Set at most once per dispatch and never cleared while the dispatch is
/// running. The dispatcher resets it when a new dispatch of the point starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptibleState {
    interrupted: bool,
    interrupted_by: Option<HandlerId>,
}

impl InterruptibleState {
    /// Creates a fresh, non-interrupted state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the point has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// The handler that interrupted the point.
    pub fn interrupted_by(&self) -> Option<&HandlerId> {
        self.interrupted_by.as_ref()
    }

    /// Marks the point interrupted by `handler`.
    ///
    /// Returns `false` without changing anything if it was already
    /// interrupted.
    pub fn interrupt(&mut self, handler: HandlerId) -> bool {
        if self.interrupted {
            return false;
        }
        self.interrupted = true;
        self.interrupted_by = Some(handler);
        true
    }

    pub(crate) fn reset(&mut self) {
        self.interrupted = false;
        self.interrupted_by = None;
    }
}
