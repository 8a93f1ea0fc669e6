//! Resolution of deferred handler references.
//!
//! Entries registered with
//! [`register_deferred`](crate::registry::PriorityRegistry::register_deferred)
//! carry only a [`HandlerId`]; the dispatcher asks its [`Resolver`] for an
//! invokable instance each time the entry runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::handler::{BoxedHandler, Handler, HandlerId, into_handler};

/// Produces handler instances from their ids.
pub trait Resolver: Send + Sync {
    /// Resolves `id`, or returns `None` if it is unknown.
    fn resolve(&self, id: &HandlerId) -> Option<BoxedHandler>;
}

impl<F> Resolver for F
where
    F: Fn(&HandlerId) -> Option<BoxedHandler> + Send + Sync,
{
    fn resolve(&self, id: &HandlerId) -> Option<BoxedHandler> {
        self(id)
    }
}

type Factory = Arc<dyn Fn() -> BoxedHandler + Send + Sync>;

/// A resolver backed by per-id factories.
///
/// # Example
///
/// ```rust,ignore
/// let resolver = FactoryResolver::new();
/// resolver.factory("billing.charge", || ChargeCard::new(gateway()));
/// resolver.instance("audit", AuditLog);
/// ```
#[derive(Default)]
pub struct FactoryResolver {
    factories: RwLock<HashMap<HandlerId, Factory>>,
}

impl FactoryResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh handler on every resolution.
    pub fn factory<H, F>(&self, id: impl Into<HandlerId>, factory: F)
    where
        H: Handler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(id.into(), Arc::new(move || into_handler(factory())));
    }

    /// Shares one handler instance across resolutions.
    pub fn instance<H: Handler>(&self, id: impl Into<HandlerId>, handler: H) {
        let shared = into_handler(handler);
        self.factories
            .write()
            .insert(id.into(), Arc::new(move || Arc::clone(&shared)));
    }

    /// Whether `id` can be resolved.
    pub fn contains(&self, id: &HandlerId) -> bool {
        self.factories.read().contains_key(id)
    }
}

impl Resolver for FactoryResolver {
    fn resolve(&self, id: &HandlerId) -> Option<BoxedHandler> {
        let factory = self.factories.read().get(id).cloned();
        factory.map(|f| f())
    }
}

impl std::fmt::Debug for FactoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryResolver")
            .field("factory_count", &self.factories.read().len())
            .finish()
    }
}
