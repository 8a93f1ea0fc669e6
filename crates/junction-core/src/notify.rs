//! Downstream notification of finished dispatches.
//!
//! Every non-silent dispatch ends by handing the (possibly mutated) point to
//! the dispatcher's [`Notifier`]. Notification is purely observational.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::point::{ExtensionPoint, PointKey};

/// Observes points after non-silent dispatches.
pub trait Notifier: Send + Sync {
    /// Called once per non-silent dispatch with the final point.
    fn notify(&self, key: &PointKey, point: &dyn Any);
}

type Listener = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// A typed event bus keyed by extension point type.
///
/// # Example
///
/// ```rust,ignore
/// let bus = Arc::new(EventBus::new());
/// bus.subscribe(|order: &OrderPlaced| metrics::counter!("orders").increment(1));
///
/// let dispatcher = Dispatcher::new(registry).with_notifier(bus);
/// ```
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<TypeId, Vec<Listener>>>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to dispatches of `P`.
    pub fn subscribe<P, F>(&self, listener: F)
    where
        P: ExtensionPoint,
        F: Fn(&P) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |point: &dyn Any| {
            if let Some(point) = point.downcast_ref::<P>() {
                listener(point);
            }
        });
        self.listeners
            .write()
            .entry(TypeId::of::<P>())
            .or_default()
            .push(listener);
    }

    /// Number of listeners for `P`.
    pub fn listener_count<P: ExtensionPoint>(&self) -> usize {
        self.listeners
            .read()
            .get(&TypeId::of::<P>())
            .map_or(0, Vec::len)
    }

    /// Drops every listener for `P`.
    pub fn unsubscribe_all<P: ExtensionPoint>(&self) {
        self.listeners.write().remove(&TypeId::of::<P>());
    }
}

impl Notifier for EventBus {
    fn notify(&self, key: &PointKey, point: &dyn Any) {
        // Clone out so listeners may subscribe without deadlocking.
        let listeners = self.listeners.read().get(&key.type_id()).cloned();
        let Some(listeners) = listeners else {
            return;
        };
        trace!(point = key.name(), listeners = listeners.len(), "Notifying listeners");
        for listener in &listeners {
            listener(point);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventBus")
            .field("point_types", &listeners.len())
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
