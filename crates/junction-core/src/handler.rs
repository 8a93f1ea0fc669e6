//! Handler system for extension point dispatch.
//!
//! A [`Handler`] is a unit of logic registered against one extension point
//! type. It receives the point mutably and returns a loosely-typed
//! [`serde_json::Value`]. The boolean `false` is reserved: on an
//! interruptible point it vetoes every handler that would run afterwards.
//! Any other value, including `null`, means "no opinion, continue".
//!
//! # Example
//!
//! ```rust,ignore
//! use junction_core::{Handler, HandlerResult, handler_fn};
//! use serde_json::Value;
//!
//! struct RejectEmptyCart;
//!
//! impl Handler for RejectEmptyCart {
//!     type Point = OrderPlaced;
//!
//!     fn handle(&self, order: &mut OrderPlaced) -> HandlerResult {
//!         Ok(Value::Bool(!order.items.is_empty()))
//!     }
//! }
//!
//! // Closures work too; the return value goes through `IntoHandlerOutput`.
//! let audit = handler_fn("audit", |order: &mut OrderPlaced| {
//!     order.errors.is_empty()
//! });
//! ```

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoxError, RegistryError};
use crate::point::{ExtensionPoint, PointKey};

/// Priority conventions. Lower values run first.
pub mod priority {
    /// Critical handlers (0-49).
    pub const CRITICAL: i32 = 0;
    /// High priority handlers (50-99).
    pub const HIGH: i32 = 50;
    /// The default priority (100-149).
    pub const NORMAL: i32 = 100;
    /// Low priority handlers (150-199).
    pub const LOW: i32 = 150;
    /// Background handlers (200 and above).
    pub const BACKGROUND: i32 = 200;
}

/// The value a handler produced, or the error it raised.
pub type HandlerResult = Result<Value, BoxError>;

// ============================================================================
// Handler Identity
// ============================================================================

/// Stable identity of a handler.
///
/// Used as the circuit breaker key, the mute key, and the key of every
/// per-handler record in a [`DispatchResult`](crate::result::DispatchResult).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Arc<str>);

impl HandlerId {
    /// Creates an id from any string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Derives an id from a handler's type name.
    pub fn of<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HandlerId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for HandlerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for HandlerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// IntoHandlerOutput - Normalize closure return values
// ============================================================================

/// Conversion of closure return values into a [`HandlerResult`].
pub trait IntoHandlerOutput {
    /// Converts `self` into the handler's result.
    fn into_output(self) -> HandlerResult;
}

impl IntoHandlerOutput for () {
    fn into_output(self) -> HandlerResult {
        Ok(Value::Null)
    }
}

impl IntoHandlerOutput for bool {
    fn into_output(self) -> HandlerResult {
        Ok(Value::Bool(self))
    }
}

impl IntoHandlerOutput for Value {
    fn into_output(self) -> HandlerResult {
        Ok(self)
    }
}

impl IntoHandlerOutput for String {
    fn into_output(self) -> HandlerResult {
        Ok(Value::String(self))
    }
}

impl IntoHandlerOutput for &'static str {
    fn into_output(self) -> HandlerResult {
        Ok(Value::from(self))
    }
}

impl IntoHandlerOutput for i64 {
    fn into_output(self) -> HandlerResult {
        Ok(Value::from(self))
    }
}

impl IntoHandlerOutput for f64 {
    fn into_output(self) -> HandlerResult {
        Ok(Value::from(self))
    }
}

/// `None` means "no opinion".
impl<T: IntoHandlerOutput> IntoHandlerOutput for Option<T> {
    fn into_output(self) -> HandlerResult {
        match self {
            Some(value) => value.into_output(),
            None => Ok(Value::Null),
        }
    }
}

/// `Err` becomes a handler failure.
impl<T, E> IntoHandlerOutput for Result<T, E>
where
    T: IntoHandlerOutput,
    E: Into<BoxError>,
{
    fn into_output(self) -> HandlerResult {
        match self {
            Ok(value) => value.into_output(),
            Err(err) => Err(err.into()),
        }
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for extension point handlers.
pub trait Handler: Send + Sync + 'static {
    /// The extension point type this handler accepts.
    type Point: ExtensionPoint;

    /// Returns this handler's identity. Defaults to the type name.
    fn id(&self) -> HandlerId {
        HandlerId::of::<Self>()
    }

    /// Handles one dispatch of the point.
    fn handle(&self, point: &mut Self::Point) -> HandlerResult;
}

/// A handler built from a closure by [`handler_fn`].
pub struct FnHandler<P, F> {
    id: HandlerId,
    f: F,
    _point: PhantomData<fn(&mut P)>,
}

impl<P, F, R> Handler for FnHandler<P, F>
where
    P: ExtensionPoint,
    F: Fn(&mut P) -> R + Send + Sync + 'static,
    R: IntoHandlerOutput,
{
    type Point = P;

    fn id(&self) -> HandlerId {
        self.id.clone()
    }

    fn handle(&self, point: &mut P) -> HandlerResult {
        (self.f)(point).into_output()
    }
}

/// Wraps a closure as a named handler.
pub fn handler_fn<P, F, R>(id: impl Into<HandlerId>, f: F) -> FnHandler<P, F>
where
    P: ExtensionPoint,
    F: Fn(&mut P) -> R + Send + Sync + 'static,
    R: IntoHandlerOutput,
{
    FnHandler {
        id: id.into(),
        f,
        _point: PhantomData,
    }
}

// ============================================================================
// Type-erased Handler
// ============================================================================

/// Object-safe view of a [`Handler`] with its point type erased.
///
/// This is what the registry stores and what discovery collaborators hand to
/// [`PriorityRegistry::register_named`](crate::registry::PriorityRegistry::register_named).
pub trait ErasedHandler: Send + Sync {
    /// The handler's identity.
    fn id(&self) -> &HandlerId;

    /// The extension point type the handler declares.
    fn accepts(&self) -> PointKey;

    /// Invokes the handler on a type-erased point.
    fn call(&self, point: &mut dyn Any) -> HandlerResult;
}

/// A shared, type-erased handler.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

struct TypedHandler<H> {
    id: HandlerId,
    inner: H,
}

impl<H: Handler> ErasedHandler for TypedHandler<H> {
    fn id(&self) -> &HandlerId {
        &self.id
    }

    fn accepts(&self) -> PointKey {
        PointKey::of::<H::Point>()
    }

    fn call(&self, point: &mut dyn Any) -> HandlerResult {
        match point.downcast_mut::<H::Point>() {
            Some(point) => self.inner.handle(point),
            None => Err(Box::new(RegistryError::SignatureMismatch {
                handler: self.id.clone(),
                accepts: H::Point::point_name(),
                point: "<foreign point type>",
            })),
        }
    }
}

/// Erases a handler's point type.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(TypedHandler {
        id: handler.id(),
        inner: handler,
    })
}

impl fmt::Debug for dyn ErasedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedHandler")
            .field("id", self.id())
            .field("accepts", &self.accepts().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        hits: u32,
    }

    impl ExtensionPoint for Counter {}

    struct Other;

    impl ExtensionPoint for Other {}

    struct Increment;

    impl Handler for Increment {
        type Point = Counter;

        fn handle(&self, point: &mut Counter) -> HandlerResult {
            point.hits += 1;
            Ok(Value::from(point.hits))
        }
    }

    #[test]
    fn test_default_id_is_type_name() {
        assert!(Increment.id().as_str().ends_with("Increment"));
    }

    #[test]
    fn test_erased_call_downcasts() {
        let handler = into_handler(Increment);
        let mut point = Counter::default();

        let value = handler.call(&mut point).unwrap();
        assert_eq!(value, Value::from(1));
        assert_eq!(handler.accepts(), PointKey::of::<Counter>());
    }

    #[test]
    fn test_erased_call_rejects_foreign_point() {
        let handler = into_handler(Increment);
        let err = handler.call(&mut Other).unwrap_err();
        assert!(err.downcast_ref::<RegistryError>().is_some());
    }

    #[test]
    fn test_closure_outputs() {
        let unit = into_handler(handler_fn("unit", |_: &mut Counter| {}));
        let veto = into_handler(handler_fn("veto", |_: &mut Counter| false));
        let none = into_handler(handler_fn("none", |_: &mut Counter| Option::<bool>::None));
        let failing = into_handler(handler_fn("failing", |_: &mut Counter| {
            Err::<(), _>("boom")
        }));

        let mut point = Counter::default();
        assert_eq!(unit.call(&mut point).unwrap(), Value::Null);
        assert_eq!(veto.call(&mut point).unwrap(), Value::Bool(false));
        assert_eq!(none.call(&mut point).unwrap(), Value::Null);
        assert_eq!(failing.call(&mut point).unwrap_err().to_string(), "boom");
        assert_eq!(failing.id().as_str(), "failing");
    }

    #[test]
    fn test_handler_id_serializes_as_string() {
        let id = HandlerId::new("audit");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, Value::String("audit".into()));
        assert_eq!(serde_json::from_value::<HandlerId>(json).unwrap(), id);
    }

    #[test]
    fn test_handler_id_set_lookup_by_str() {
        let mut ids = std::collections::HashSet::new();
        ids.insert(HandlerId::new("audit"));
        assert!(ids.contains("audit"));
        assert!(ids.remove("audit"));
        assert!(!ids.contains("audit"));
    }
}
