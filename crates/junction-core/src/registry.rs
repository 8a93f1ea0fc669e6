//! Priority-ordered handler registry.
//!
//! The [`PriorityRegistry`] stores, per extension point type, the handler
//! entries registered against it and hands the dispatcher a sorted view:
//!
//! 1. Entries are ordered by priority, ascending (lower runs first)
//! 2. Entries with equal priority keep their registration order
//! 3. Entries carrying a disabled tag, or in a disabled group, are left out
//!
//! The sorted view is memoized per point type. Every mutating call drops the
//! memoized view it affects, so a dispatch always observes the latest
//! registration state.
//!
//! ```rust,ignore
//! use junction_core::{PriorityRegistry, priority};
//!
//! let registry = PriorityRegistry::new();
//! let audit = registry.register(AuditOrder, priority::BACKGROUND);
//! registry.register(ValidateStock, priority::CRITICAL);
//! registry.tag(audit, ["audit"])?;
//!
//! // Bulk import: keep auditing quiet without losing the registration.
//! registry.disable_tag("audit");
//! ```

use std::any::TypeId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{RegistryError, RegistryResult};
use crate::handler::{BoxedHandler, Handler, HandlerId, into_handler, priority};
use crate::point::{ExtensionPoint, PointKey};
use crate::queue::{QueueOptions, QueuePlan, snapshot_of};
use crate::validator;

// ============================================================================
// Identifiers
// ============================================================================

/// Handle to one registration, returned by every `register*` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryHandle(u64);

impl EntryHandle {
    /// The raw handle value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named lifetime boundary (a request, a tenant) for a set of registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId(Arc<str>);

impl ScopeId {
    /// Creates a scope id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The scope id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Handler Entries
// ============================================================================

/// How an entry reaches its handler instance.
#[derive(Clone)]
pub enum HandlerRef {
    /// A live instance, invoked directly.
    Instance(BoxedHandler),
    /// An id resolved through the dispatcher's resolver on each run.
    Deferred(HandlerId),
}

/// One registration of a handler against an extension point type.
#[derive(Clone)]
pub struct HandlerEntry {
    handle: EntryHandle,
    point: PointKey,
    id: HandlerId,
    handler: HandlerRef,
    priority: i32,
    tags: BTreeSet<String>,
    group: Option<String>,
    scope: Option<ScopeId>,
    queue: Option<QueuePlan>,
}

impl HandlerEntry {
    /// The registration handle.
    pub fn handle(&self) -> EntryHandle {
        self.handle
    }

    /// The point type this entry is registered for.
    pub fn point(&self) -> PointKey {
        self.point
    }

    /// The handler's identity.
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    /// The handler instance or deferred reference.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    /// The entry's priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The entry's tags.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Whether the entry carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// The group the entry was registered in.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// The scope the entry belongs to.
    pub fn scope(&self) -> Option<&ScopeId> {
        self.scope.as_ref()
    }

    /// Whether the entry runs through the queue instead of inline.
    pub fn is_queued(&self) -> bool {
        self.queue.is_some()
    }

    /// The queueing options of a queued entry.
    pub fn queue_options(&self) -> Option<&QueueOptions> {
        self.queue.as_ref().map(|plan| &plan.options)
    }

    pub(crate) fn queue_plan(&self) -> Option<&QueuePlan> {
        self.queue.as_ref()
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("handle", &self.handle)
            .field("point", &self.point.name())
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("group", &self.group)
            .field("scope", &self.scope)
            .field("queued", &self.queue.is_some())
            .field("deferred", &matches!(self.handler, HandlerRef::Deferred(_)))
            .finish()
    }
}

/// A sorted, immutable snapshot of the entries for one point type.
pub type HandlerList = Arc<[Arc<HandlerEntry>]>;

/// Everything needed to create an entry.
struct Registration {
    point: PointKey,
    id: HandlerId,
    handler: HandlerRef,
    priority: i32,
    group: Option<String>,
    scope: Option<ScopeId>,
    queue: Option<QueuePlan>,
}

impl Registration {
    fn instance(handler: BoxedHandler, priority: i32) -> Self {
        Self {
            point: handler.accepts(),
            id: handler.id().clone(),
            handler: HandlerRef::Instance(handler),
            priority,
            group: None,
            scope: None,
            queue: None,
        }
    }

    fn deferred(point: PointKey, id: HandlerId, priority: i32) -> Self {
        Self {
            point,
            id: id.clone(),
            handler: HandlerRef::Deferred(id),
            priority,
            group: None,
            scope: None,
            queue: None,
        }
    }

    fn queued<P: ExtensionPoint + Clone>(mut self, options: QueueOptions) -> Self {
        self.queue = Some(QueuePlan {
            options,
            snapshot: snapshot_of::<P>,
        });
        self
    }

    fn in_group(mut self, group: Option<&str>) -> Self {
        self.group = group.map(str::to_string);
        self
    }

    fn in_scope(mut self, scope: Option<&ScopeId>) -> Self {
        self.scope = scope.cloned();
        self
    }
}

// ============================================================================
// Priority Registry
// ============================================================================

#[derive(Default)]
struct Inner {
    points: HashMap<TypeId, Vec<Arc<HandlerEntry>>>,
    declared: HashMap<&'static str, PointKey>,
    locations: HashMap<EntryHandle, TypeId>,
    disabled_tags: HashSet<String>,
    disabled_groups: HashSet<String>,
}

impl Inner {
    fn is_enabled(&self, entry: &HandlerEntry) -> bool {
        let group_enabled = entry
            .group
            .as_ref()
            .is_none_or(|group| !self.disabled_groups.contains(group));
        group_enabled && entry.tags.iter().all(|tag| !self.disabled_tags.contains(tag))
    }

    fn entry_mut(&mut self, handle: EntryHandle) -> RegistryResult<&mut HandlerEntry> {
        let type_id = self
            .locations
            .get(&handle)
            .ok_or(RegistryError::UnknownEntry(handle.0))?;
        self.points
            .get_mut(type_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.handle == handle))
            .map(Arc::make_mut)
            .ok_or(RegistryError::UnknownEntry(handle.0))
    }

    /// Removes every entry matching `pred`, returning the affected point types.
    fn retain_entries<F>(&mut self, mut pred: F) -> Vec<TypeId>
    where
        F: FnMut(&HandlerEntry) -> bool,
    {
        let mut touched = Vec::new();
        for (type_id, entries) in &mut self.points {
            let before = entries.len();
            entries.retain(|entry| {
                let keep = pred(entry);
                if !keep {
                    self.locations.remove(&entry.handle);
                }
                keep
            });
            if entries.len() != before {
                touched.push(*type_id);
            }
        }
        touched
    }
}

/// The process-local registry of handler entries.
///
/// `PriorityRegistry` is `Send + Sync`; share it behind an `Arc`. It is
/// designed for a single writer (registration usually happens at startup)
/// with many concurrent dispatch readers.
pub struct PriorityRegistry {
    inner: RwLock<Inner>,
    sorted: Mutex<HashMap<TypeId, HandlerList>>,
    next_handle: AtomicU64,
}

impl Default for PriorityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            sorted: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Declaration
    // ------------------------------------------------------------------

    /// Declares `P` as an extension point, enabling name-based registration.
    pub fn declare<P: ExtensionPoint>(&self) -> PointKey {
        let key = PointKey::of::<P>();
        self.inner.write().declared.insert(key.name(), key);
        key
    }

    /// Looks up a declared point by name.
    pub fn declared(&self, name: &str) -> Option<PointKey> {
        self.inner.read().declared.get(name).copied()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registers a handler for its point type.
    pub fn register<H: Handler>(&self, handler: H, priority: i32) -> EntryHandle {
        self.insert(Registration::instance(into_handler(handler), priority))
    }

    /// Registers a handler with the default priority.
    pub fn register_default<H: Handler>(&self, handler: H) -> EntryHandle {
        self.register(handler, priority::NORMAL)
    }

    /// Registers a handler that runs out-of-band through the queue.
    ///
    /// The point is cloned at dispatch time; the queued handler never sees
    /// later mutations and cannot veto the dispatch that queued it.
    pub fn register_queued<H>(&self, handler: H, priority: i32, options: QueueOptions) -> EntryHandle
    where
        H: Handler,
        H::Point: Clone,
    {
        self.insert(
            Registration::instance(into_handler(handler), priority).queued::<H::Point>(options),
        )
    }

    /// Registers a deferred reference, resolved at dispatch time.
    pub fn register_deferred<P: ExtensionPoint>(
        &self,
        id: impl Into<HandlerId>,
        priority: i32,
    ) -> EntryHandle {
        self.insert(Registration::deferred(PointKey::of::<P>(), id.into(), priority))
    }

    /// Registers an erased handler for `P`, validating its signature.
    pub fn register_boxed<P: ExtensionPoint>(
        &self,
        handler: BoxedHandler,
        priority: i32,
    ) -> RegistryResult<EntryHandle> {
        let key = PointKey::of::<P>();
        validator::check_signature(&key, handler.as_ref())?;
        Ok(self.insert(Registration::instance(handler, priority)))
    }

    /// Registers an erased handler against a point declared under `name`.
    ///
    /// This is the entry point for discovery collaborators that only know
    /// point names.
    pub fn register_named(
        &self,
        name: &str,
        handler: BoxedHandler,
        priority: i32,
    ) -> RegistryResult<EntryHandle> {
        let key = self
            .declared(name)
            .ok_or_else(|| RegistryError::InvalidExtensionPoint {
                name: name.to_string(),
            })?;
        validator::check_signature(&key, handler.as_ref())?;
        Ok(self.insert(Registration::instance(handler, priority)))
    }

    /// Registers a handler that lives until [`clear_scope`](Self::clear_scope).
    pub fn register_in_scope<H: Handler>(
        &self,
        scope: &ScopeId,
        handler: H,
        priority: i32,
    ) -> EntryHandle {
        self.insert(Registration::instance(into_handler(handler), priority).in_scope(Some(scope)))
    }

    /// Returns a registrar that puts every registration into `group`.
    pub fn group(&self, name: impl Into<String>) -> GroupRegistrar<'_> {
        GroupRegistrar {
            registry: self,
            group: name.into(),
        }
    }

    fn insert(&self, registration: Registration) -> EntryHandle {
        let handle = EntryHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let key = registration.point;
        let entry = HandlerEntry {
            handle,
            point: key,
            id: registration.id,
            handler: registration.handler,
            priority: registration.priority,
            tags: BTreeSet::new(),
            group: registration.group,
            scope: registration.scope,
            queue: registration.queue,
        };

        debug!(
            point = key.name(),
            handler = %entry.id,
            priority = entry.priority,
            handle = %handle,
            "Registered handler"
        );

        let mut inner = self.inner.write();
        inner.declared.insert(key.name(), key);
        inner.locations.insert(handle, key.type_id());
        inner
            .points
            .entry(key.type_id())
            .or_default()
            .push(Arc::new(entry));
        self.invalidate(&[key.type_id()]);

        handle
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Returns the enabled entries for `P` in dispatch order.
    pub fn handlers<P: ExtensionPoint>(&self) -> HandlerList {
        self.handlers_for(&PointKey::of::<P>())
    }

    /// Returns the enabled entries for `key` in dispatch order.
    ///
    /// Ordering is a stable sort by ascending priority: entries with equal
    /// priority stay in registration order.
    pub fn handlers_for(&self, key: &PointKey) -> HandlerList {
        let inner = self.inner.read();
        let mut sorted = self.sorted.lock();
        if let Some(list) = sorted.get(&key.type_id()) {
            return Arc::clone(list);
        }

        let mut entries: Vec<Arc<HandlerEntry>> = inner
            .points
            .get(&key.type_id())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| inner.is_enabled(entry))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|entry| entry.priority);

        trace!(point = key.name(), count = entries.len(), "Rebuilt sorted view");
        let list: HandlerList = entries.into();
        sorted.insert(key.type_id(), Arc::clone(&list));
        list
    }

    /// Whether any enabled entry exists for `P`.
    pub fn has_handlers<P: ExtensionPoint>(&self) -> bool {
        !self.handlers::<P>().is_empty()
    }

    /// Looks up an entry by handle, including disabled ones.
    pub fn entry(&self, handle: EntryHandle) -> Option<Arc<HandlerEntry>> {
        let inner = self.inner.read();
        let type_id = inner.locations.get(&handle)?;
        inner
            .points
            .get(type_id)?
            .iter()
            .find(|entry| entry.handle == handle)
            .cloned()
    }

    /// Total number of registered entries, enabled or not.
    pub fn len(&self) -> usize {
        self.inner.read().locations.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Adds tags to an entry.
    pub fn tag<I, S>(&self, handle: EntryHandle, tags: I) -> RegistryResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(handle)?;
        entry.tags.extend(tags.into_iter().map(Into::into));
        let type_id = entry.point.type_id();
        self.invalidate(&[type_id]);
        Ok(())
    }

    /// Removes a tag from an entry.
    pub fn untag(&self, handle: EntryHandle, tag: &str) -> RegistryResult<()> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(handle)?;
        entry.tags.remove(tag);
        let type_id = entry.point.type_id();
        self.invalidate(&[type_id]);
        Ok(())
    }

    /// Returns every entry carrying `tag`, enabled or not, in registration order.
    pub fn tagged(&self, tag: &str) -> Vec<Arc<HandlerEntry>> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .points
            .values()
            .flatten()
            .filter(|entry| entry.has_tag(tag))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.handle);
        entries
    }

    /// Hides every entry carrying `tag` from dispatch.
    pub fn disable_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        debug!(tag = %tag, "Disabling tag");
        let mut inner = self.inner.write();
        inner.disabled_tags.insert(tag);
        self.invalidate_all();
    }

    /// Restores entries hidden by [`disable_tag`](Self::disable_tag).
    pub fn enable_tag(&self, tag: &str) {
        debug!(tag = %tag, "Enabling tag");
        let mut inner = self.inner.write();
        inner.disabled_tags.remove(tag);
        self.invalidate_all();
    }

    /// Whether `tag` is currently disabled.
    pub fn is_tag_disabled(&self, tag: &str) -> bool {
        self.inner.read().disabled_tags.contains(tag)
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Hides every entry of `group` from dispatch.
    pub fn disable_group(&self, group: impl Into<String>) {
        let group = group.into();
        debug!(group = %group, "Disabling group");
        let mut inner = self.inner.write();
        inner.disabled_groups.insert(group);
        self.invalidate_all();
    }

    /// Restores entries hidden by [`disable_group`](Self::disable_group).
    pub fn enable_group(&self, group: &str) {
        debug!(group = %group, "Enabling group");
        let mut inner = self.inner.write();
        inner.disabled_groups.remove(group);
        self.invalidate_all();
    }

    /// Whether `group` is currently disabled.
    pub fn is_group_disabled(&self, group: &str) -> bool {
        self.inner.read().disabled_groups.contains(group)
    }

    /// Returns every entry registered in `group`, in registration order.
    pub fn group_members(&self, group: &str) -> Vec<Arc<HandlerEntry>> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .points
            .values()
            .flatten()
            .filter(|entry| entry.group() == Some(group))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.handle);
        entries
    }

    /// Removes every entry of `group`. Returns how many were removed.
    pub fn remove_group(&self, group: &str) -> usize {
        self.remove_where(|entry| entry.group() == Some(group))
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Removes every entry registered in `scope`. Returns how many were removed.
    pub fn clear_scope(&self, scope: &ScopeId) -> usize {
        let removed = self.remove_where(|entry| entry.scope() == Some(scope));
        debug!(scope = %scope, removed, "Cleared scope");
        removed
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Removes one registration.
    pub fn remove(&self, handle: EntryHandle) -> RegistryResult<()> {
        let mut inner = self.inner.write();
        let type_id = inner
            .locations
            .remove(&handle)
            .ok_or(RegistryError::UnknownEntry(handle.0))?;
        if let Some(entries) = inner.points.get_mut(&type_id) {
            entries.retain(|entry| entry.handle != handle);
        }
        self.invalidate(&[type_id]);
        Ok(())
    }

    /// Removes every registration of handler `id` for `P`.
    pub fn remove_handler<P: ExtensionPoint>(&self, id: &HandlerId) -> usize {
        let type_id = TypeId::of::<P>();
        self.remove_where(|entry| entry.point.type_id() == type_id && &entry.id == id)
    }

    /// Removes every registration for `P`.
    pub fn forget<P: ExtensionPoint>(&self) {
        let type_id = TypeId::of::<P>();
        let mut inner = self.inner.write();
        if let Some(entries) = inner.points.remove(&type_id) {
            for entry in entries {
                inner.locations.remove(&entry.handle);
            }
        }
        self.invalidate(&[type_id]);
    }

    /// Removes every registration and re-enables all tags and groups.
    ///
    /// Point declarations are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.points.clear();
        inner.locations.clear();
        inner.disabled_tags.clear();
        inner.disabled_groups.clear();
        self.invalidate_all();
    }

    fn remove_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&HandlerEntry) -> bool,
    {
        let mut inner = self.inner.write();
        let before = inner.locations.len();
        let touched = inner.retain_entries(|entry| !pred(entry));
        let removed = before - inner.locations.len();
        self.invalidate(&touched);
        removed
    }

    // ------------------------------------------------------------------
    // Caching
    // ------------------------------------------------------------------

    // Both must be called with the `inner` write lock held, so no reader can
    // rebuild a view from the state being replaced.

    fn invalidate(&self, type_ids: &[TypeId]) {
        let mut sorted = self.sorted.lock();
        for type_id in type_ids {
            sorted.remove(type_id);
        }
    }

    fn invalidate_all(&self) {
        self.sorted.lock().clear();
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Returns statistics about the registry.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        let entries = inner.points.values().flatten();

        let mut stats = RegistryStats {
            points: inner.points.values().filter(|e| !e.is_empty()).count(),
            disabled_tags: inner.disabled_tags.len(),
            disabled_groups: inner.disabled_groups.len(),
            ..Default::default()
        };
        let mut scopes = HashSet::new();
        for entry in entries {
            stats.entries += 1;
            if entry.is_queued() {
                stats.queued += 1;
            }
            if matches!(entry.handler, HandlerRef::Deferred(_)) {
                stats.deferred += 1;
            }
            if let Some(scope) = &entry.scope {
                scopes.insert(scope.clone());
            }
        }
        stats.scopes = scopes.len();
        stats
    }
}

impl fmt::Debug for PriorityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Registers handlers into a named group.
///
/// Obtained from [`PriorityRegistry::group`].
pub struct GroupRegistrar<'a> {
    registry: &'a PriorityRegistry,
    group: String,
}

impl GroupRegistrar<'_> {
    /// The group name.
    pub fn name(&self) -> &str {
        &self.group
    }

    /// Registers a handler into the group.
    pub fn register<H: Handler>(&self, handler: H, priority: i32) -> EntryHandle {
        self.registry.insert(
            Registration::instance(into_handler(handler), priority).in_group(Some(&self.group)),
        )
    }

    /// Registers a queued handler into the group.
    pub fn register_queued<H>(&self, handler: H, priority: i32, options: QueueOptions) -> EntryHandle
    where
        H: Handler,
        H::Point: Clone,
    {
        self.registry.insert(
            Registration::instance(into_handler(handler), priority)
                .queued::<H::Point>(options)
                .in_group(Some(&self.group)),
        )
    }

    /// Registers a deferred reference into the group.
    pub fn register_deferred<P: ExtensionPoint>(
        &self,
        id: impl Into<HandlerId>,
        priority: i32,
    ) -> EntryHandle {
        self.registry.insert(
            Registration::deferred(PointKey::of::<P>(), id.into(), priority)
                .in_group(Some(&self.group)),
        )
    }
}

/// Statistics about the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Point types with at least one entry.
    pub points: usize,
    /// Total entries.
    pub entries: usize,
    /// Entries that run through the queue.
    pub queued: usize,
    /// Entries resolved at dispatch time.
    pub deferred: usize,
    /// Distinct live scopes.
    pub scopes: usize,
    /// Disabled tags.
    pub disabled_tags: usize,
    /// Disabled groups.
    pub disabled_groups: usize,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handlers: {} across {} points ({} queued, {} deferred), {} scopes, {} tags and {} groups disabled",
            self.entries,
            self.points,
            self.queued,
            self.deferred,
            self.scopes,
            self.disabled_tags,
            self.disabled_groups
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    #[derive(Clone, Default)]
    struct Saved;
    impl ExtensionPoint for Saved {
        fn point_name() -> &'static str {
            "record.saved"
        }
    }

    struct Deleted;
    impl ExtensionPoint for Deleted {
        fn point_name() -> &'static str {
            "record.deleted"
        }
    }

    fn noop(id: &str) -> impl Handler<Point = Saved> + use<> {
        handler_fn(id.to_string(), |_: &mut Saved| {})
    }

    fn ids(list: &HandlerList) -> Vec<&str> {
        list.iter().map(|entry| entry.id().as_str()).collect()
    }

    #[test]
    fn test_distinct_priorities_sorted_ascending() {
        let registry = PriorityRegistry::new();
        registry.register(noop("low"), 150);
        registry.register(noop("critical"), 0);
        registry.register(noop("normal"), 100);
        registry.register(noop("high"), 50);

        let list = registry.handlers::<Saved>();
        assert_eq!(ids(&list), ["critical", "high", "normal", "low"]);
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let registry = PriorityRegistry::new();
        registry.register(noop("a"), 100);
        registry.register(noop("b"), 10);
        registry.register(noop("c"), 100);
        registry.register(noop("d"), 10);
        registry.register(noop("e"), 100);

        let list = registry.handlers::<Saved>();
        assert_eq!(ids(&list), ["b", "d", "a", "c", "e"]);
    }

    #[test]
    fn test_sorted_view_sees_new_registrations() {
        let registry = PriorityRegistry::new();
        registry.register(noop("first"), 100);
        assert_eq!(ids(&registry.handlers::<Saved>()), ["first"]);

        registry.register(noop("earlier"), 1);
        assert_eq!(ids(&registry.handlers::<Saved>()), ["earlier", "first"]);
    }

    #[test]
    fn test_sorted_view_is_memoized_until_mutation() {
        let registry = PriorityRegistry::new();
        registry.register(noop("a"), 100);

        let first = registry.handlers::<Saved>();
        let second = registry.handlers::<Saved>();
        assert!(Arc::ptr_eq(&first, &second));

        registry.register(handler_fn("other", |_: &mut Deleted| {}), 100);
        let third = registry.handlers::<Saved>();
        assert!(Arc::ptr_eq(&first, &third));

        registry.register(noop("b"), 100);
        let fourth = registry.handlers::<Saved>();
        assert!(!Arc::ptr_eq(&first, &fourth));
    }

    #[test]
    fn test_points_are_isolated() {
        let registry = PriorityRegistry::new();
        registry.register(noop("saved"), 100);
        registry.register(handler_fn("deleted", |_: &mut Deleted| {}), 100);

        assert_eq!(ids(&registry.handlers::<Saved>()), ["saved"]);
        assert_eq!(ids(&registry.handlers::<Deleted>()), ["deleted"]);
    }

    #[test]
    fn test_disable_tag_restores_exact_position() {
        let registry = PriorityRegistry::new();
        registry.register(noop("a"), 100);
        let audit = registry.register(noop("audit"), 100);
        registry.register(noop("c"), 100);
        registry.tag(audit, ["audit", "slow"]).unwrap();

        registry.disable_tag("audit");
        assert!(registry.is_tag_disabled("audit"));
        assert_eq!(ids(&registry.handlers::<Saved>()), ["a", "c"]);
        assert_eq!(registry.tagged("audit").len(), 1);

        registry.enable_tag("audit");
        assert_eq!(ids(&registry.handlers::<Saved>()), ["a", "audit", "c"]);
        assert_eq!(registry.entry(audit).unwrap().priority(), 100);
    }

    #[test]
    fn test_untag_and_unknown_entry() {
        let registry = PriorityRegistry::new();
        let handle = registry.register(noop("a"), 100);
        registry.tag(handle, ["x"]).unwrap();
        registry.disable_tag("x");
        assert!(registry.handlers::<Saved>().is_empty());

        registry.untag(handle, "x").unwrap();
        assert_eq!(ids(&registry.handlers::<Saved>()), ["a"]);

        registry.remove(handle).unwrap();
        assert_eq!(
            registry.tag(handle, ["y"]),
            Err(RegistryError::UnknownEntry(handle.get()))
        );
    }

    #[test]
    fn test_groups_bulk_toggle() {
        let registry = PriorityRegistry::new();
        let billing = registry.group("billing");
        billing.register(noop("charge"), 10);
        billing.register(noop("invoice"), 20);
        registry.register(noop("log"), 30);

        assert_eq!(registry.group_members("billing").len(), 2);

        registry.disable_group("billing");
        assert_eq!(ids(&registry.handlers::<Saved>()), ["log"]);

        registry.enable_group("billing");
        assert_eq!(ids(&registry.handlers::<Saved>()), ["charge", "invoice", "log"]);

        assert_eq!(registry.remove_group("billing"), 2);
        assert_eq!(ids(&registry.handlers::<Saved>()), ["log"]);
    }

    #[test]
    fn test_scope_cleanup() {
        let registry = PriorityRegistry::new();
        let request = ScopeId::new("request-42");
        registry.register(noop("global"), 100);
        registry.register_in_scope(&request, noop("scoped"), 50);

        assert_eq!(ids(&registry.handlers::<Saved>()), ["scoped", "global"]);
        assert_eq!(registry.stats().scopes, 1);

        assert_eq!(registry.clear_scope(&request), 1);
        assert_eq!(ids(&registry.handlers::<Saved>()), ["global"]);
        assert_eq!(registry.clear_scope(&request), 0);
    }

    #[test]
    fn test_remove_handler_and_forget() {
        let registry = PriorityRegistry::new();
        registry.register(noop("dup"), 10);
        registry.register(noop("keep"), 20);
        registry.register(noop("dup"), 30);

        assert_eq!(registry.remove_handler::<Saved>(&HandlerId::new("dup")), 2);
        assert_eq!(ids(&registry.handlers::<Saved>()), ["keep"]);

        registry.forget::<Saved>();
        assert!(!registry.has_handlers::<Saved>());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_keeps_declarations() {
        let registry = PriorityRegistry::new();
        registry.register(noop("a"), 10);
        registry.disable_tag("x");
        registry.clear();

        assert!(registry.is_empty());
        assert!(!registry.is_tag_disabled("x"));
        assert!(registry.declared("record.saved").is_some());
    }

    #[test]
    fn test_register_named_rejects_undeclared_point() {
        let registry = PriorityRegistry::new();
        let handler = into_handler(noop("a"));

        let err = registry.register_named("record.saved", handler, 100).unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidExtensionPoint {
                name: "record.saved".into()
            }
        );
    }

    #[test]
    fn test_register_named_checks_signature() {
        let registry = PriorityRegistry::new();
        registry.declare::<Saved>();
        registry.declare::<Deleted>();

        let ok = registry.register_named("record.saved", into_handler(noop("a")), 100);
        assert!(ok.is_ok());

        let err = registry
            .register_named("record.deleted", into_handler(noop("b")), 100)
            .unwrap_err();
        assert!(matches!(err, RegistryError::SignatureMismatch { .. }));
        assert!(registry.handlers::<Deleted>().is_empty());
    }

    #[test]
    fn test_register_boxed_checks_signature() {
        let registry = PriorityRegistry::new();
        let err = registry
            .register_boxed::<Deleted>(into_handler(noop("a")), 100)
            .unwrap_err();
        assert!(matches!(err, RegistryError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_stats_counts_kinds() {
        let registry = PriorityRegistry::new();
        registry.register(noop("inline"), 10);
        registry.register_queued(noop("queued"), 20, QueueOptions::new().on("mail"));
        registry.register_deferred::<Saved>("deferred", 30);

        let stats = registry.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.points, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.deferred, 1);

        let list = registry.handlers::<Saved>();
        assert_eq!(list[1].queue_options().unwrap().queue.as_deref(), Some("mail"));
    }
}
