//! Extension point dispatcher.
//!
//! The [`Dispatcher`] ties the [`PriorityRegistry`], the [`CircuitBreaker`]
//! and the execution-mode flags together. Every entry point shares one
//! algorithm:
//!
//! 1. A silenced dispatcher does nothing and returns at once
//! 2. In strict mode, a point with no handlers fails with
//!    [`DispatchError::StrictModeViolation`]
//! 3. Handlers run in priority order. Muted handlers and handlers with an
//!    open circuit are skipped, queued handlers are handed to the queue
//! 4. A failing handler aborts the dispatch unless the call is graceful
//! 5. On an interruptible point, a handler returning `false` stops the loop
//! 6. Diagnostics are finalized and, unless the call is silent, the notifier
//!    sees the final point
//!
//! ```rust,ignore
//! use junction_core::{Dispatcher, PriorityRegistry};
//!
//! let registry = Arc::new(PriorityRegistry::new());
//! registry.register(CheckStock, priority::CRITICAL);
//! registry.register(SendReceipt, priority::LOW);
//!
//! let dispatcher = Dispatcher::new(registry);
//! if !dispatcher.dispatch_interruptible(&mut order)? {
//!     return Err(rejected(order.interrupted_by()));
//! }
//!
//! // One-off flags never leak into the next call.
//! let report = dispatcher.call().graceful(true).dispatch_with_results(&mut order)?;
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn};

use crate::breaker::CircuitBreaker;
use crate::config::DispatcherConfig;
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::error::{DispatchError, DispatchOutcome, HandlerFailure, QueueError};
use crate::handler::{BoxedHandler, HandlerId};
use crate::notify::Notifier;
use crate::point::{ExtensionPoint, Interruptible, InterruptibleState, PointKey};
use crate::queue::{QueueHandoff, QueuePlan, QueuedCall};
use crate::registry::{HandlerEntry, HandlerRef, PriorityRegistry};
use crate::resolver::Resolver;
use crate::result::{DebugInfo, DispatchResult, Outcome, SkipReason};
use crate::strategy::ResultStrategy;
use crate::validator;

/// Flags of a single dispatch call.
#[derive(Debug, Clone, Copy)]
struct Flags {
    graceful: bool,
    strict: bool,
    debug: bool,
}

impl From<&DispatcherConfig> for Flags {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            graceful: config.graceful,
            strict: config.strict,
            debug: config.debug,
        }
    }
}

/// The central extension point dispatcher.
///
/// `Dispatcher` is `Send + Sync`; independent dispatch calls may run
/// concurrently from several threads. Handlers within one call always run
/// sequentially.
pub struct Dispatcher {
    registry: Arc<PriorityRegistry>,
    breaker: CircuitBreaker,
    config: DispatcherConfig,
    resolver: Option<Arc<dyn Resolver>>,
    queue: Option<Arc<dyn QueueHandoff>>,
    notifier: Option<Arc<dyn Notifier>>,
    sink: Arc<dyn DiagnosticsSink>,
    muted: RwLock<HashSet<HandlerId>>,
    silenced: AtomicBool,
    silence_depth: AtomicUsize,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry` with default configuration.
    pub fn new(registry: Arc<PriorityRegistry>) -> Self {
        let config = DispatcherConfig::default();
        Self {
            registry,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            config,
            resolver: None,
            queue: None,
            notifier: None,
            sink: Arc::new(TracingSink),
            muted: RwLock::new(HashSet::new()),
            silenced: AtomicBool::new(false),
            silence_depth: AtomicUsize::new(0),
        }
    }

    /// Applies `config`, replacing the breaker with one built from it.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        self.config = config;
        self
    }

    /// Uses a preconfigured breaker, e.g. one over a shared store.
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Resolves deferred handler references through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Hands queued handlers to `queue`.
    pub fn with_queue(mut self, queue: Arc<dyn QueueHandoff>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Notifies `notifier` after every non-silent dispatch.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Sends debug timelines to `sink` instead of `tracing`.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<PriorityRegistry> {
        &self.registry
    }

    /// The circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The default configuration of every call.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Starts a call whose flags default to the configuration.
    pub fn call(&self) -> DispatchCall<'_> {
        DispatchCall {
            dispatcher: self,
            flags: Flags::from(&self.config),
        }
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Dispatches `point` and notifies. Returns the point.
    pub fn dispatch<P: ExtensionPoint>(&self, point: P) -> DispatchOutcome<P> {
        self.call().dispatch(point)
    }

    /// Dispatches an interruptible point and notifies.
    ///
    /// Returns `false` if a handler vetoed.
    pub fn dispatch_interruptible<P: Interruptible>(&self, point: &mut P) -> DispatchOutcome<bool> {
        self.call().dispatch_interruptible(point)
    }

    /// Dispatches `point` without notifying.
    pub fn dispatch_silent<P: ExtensionPoint>(&self, point: P) -> DispatchOutcome<P> {
        self.call().dispatch_silent(point)
    }

    /// Dispatches an interruptible point without notifying.
    pub fn dispatch_interruptible_silent<P: Interruptible>(
        &self,
        point: &mut P,
    ) -> DispatchOutcome<bool> {
        self.call().dispatch_interruptible_silent(point)
    }

    /// Dispatches `point`, recording what every handler did.
    pub fn dispatch_with_results<P: ExtensionPoint>(
        &self,
        point: &mut P,
    ) -> DispatchOutcome<DispatchResult> {
        self.call().dispatch_with_results(point)
    }

    /// Dispatches `point` and folds handler results with `strategy`.
    pub fn dispatch_aggregate<P: ExtensionPoint>(
        &self,
        point: &mut P,
        strategy: &dyn ResultStrategy,
    ) -> DispatchOutcome<Value> {
        self.call().dispatch_aggregate(point, strategy)
    }

    // ------------------------------------------------------------------
    // Muting
    // ------------------------------------------------------------------

    /// Skips `handler` in every dispatch until unmuted.
    pub fn mute(&self, handler: impl Into<HandlerId>) {
        let handler = handler.into();
        debug!(handler = %handler, "Handler muted");
        self.muted.write().insert(handler);
    }

    /// Lets a muted handler run again.
    pub fn unmute(&self, handler: &str) {
        self.muted.write().remove(handler);
    }

    /// Whether `handler` is muted.
    pub fn is_muted(&self, handler: &str) -> bool {
        self.muted.read().contains(handler)
    }

    /// Mutes `handlers` while `f` runs, then unmutes the ones this scope
    /// muted, even if `f` panics.
    ///
    /// Handlers that were already muted stay muted, as do mutes made by
    /// other callers while the scope runs.
    pub fn muted<I, S, R>(&self, handlers: I, f: impl FnOnce(&Self) -> R) -> R
    where
        I: IntoIterator<Item = S>,
        S: Into<HandlerId>,
    {
        let added = {
            let mut muted = self.muted.write();
            handlers
                .into_iter()
                .map(Into::into)
                .filter(|id| muted.insert(id.clone()))
                .collect()
        };
        let _guard = MuteGuard {
            muted: &self.muted,
            added,
        };
        f(self)
    }

    // ------------------------------------------------------------------
    // Silencing
    // ------------------------------------------------------------------

    /// Turns every dispatch into a no-op until [`resume`](Self::resume).
    pub fn silence_on(&self) {
        debug!("Dispatcher silenced");
        self.silenced.store(true, Ordering::SeqCst);
    }

    /// Ends a [`silence_on`](Self::silence_on). Scopes opened with
    /// [`silence`](Self::silence) stay silent until they end.
    pub fn resume(&self) {
        debug!("Dispatcher resumed");
        self.silenced.store(false, Ordering::SeqCst);
    }

    /// Whether dispatches are currently no-ops.
    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::SeqCst) || self.silence_depth.load(Ordering::SeqCst) > 0
    }

    /// Silences the dispatcher while `f` runs, even if `f` panics.
    ///
    /// Scopes nest, and leave [`silence_on`](Self::silence_on) alone.
    pub fn silence<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.silence_depth.fetch_add(1, Ordering::SeqCst);
        let _guard = SilenceGuard {
            depth: &self.silence_depth,
        };
        f(self)
    }

    // ------------------------------------------------------------------
    // Core algorithm
    // ------------------------------------------------------------------

    fn run<P: ExtensionPoint>(
        &self,
        flags: Flags,
        point: &mut P,
        notify: bool,
        strategy: Option<&dyn ResultStrategy>,
    ) -> DispatchOutcome<DispatchResult> {
        let key = PointKey::of::<P>();
        let span = debug_span!("dispatch", point = key.name());
        let _enter = span.enter();

        let mut result = DispatchResult::new(key.name());
        if self.is_silenced() {
            trace!("Dispatcher silenced, skipping");
            return Ok(result);
        }

        let entries = self.registry.handlers::<P>();
        if flags.strict && entries.is_empty() {
            return Err(DispatchError::StrictModeViolation { point: key.name() });
        }

        if let Some(state) = point.interruption_mut() {
            state.reset();
        }

        let mut timeline = flags.debug.then(|| DebugInfo::start(key.name()));
        let outcome = self.visit(
            &entries,
            &key,
            point,
            flags,
            strategy,
            &mut result,
            &mut timeline,
        );

        if let Some(mut info) = timeline {
            info.finish(result.interrupted_by().cloned());
            self.sink.record(&info);
        }
        outcome?;

        if notify && let Some(notifier) = &self.notifier {
            notifier.notify(&key, &*point);
        }

        debug!(
            handlers = entries.len(),
            succeeded = result.successes().len(),
            failed = result.errors().len(),
            skipped = result.skipped().len(),
            interrupted = result.is_interrupted(),
            "Dispatch complete"
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit<P: ExtensionPoint>(
        &self,
        entries: &[Arc<HandlerEntry>],
        key: &PointKey,
        point: &mut P,
        flags: Flags,
        strategy: Option<&dyn ResultStrategy>,
        result: &mut DispatchResult,
        timeline: &mut Option<DebugInfo>,
    ) -> DispatchOutcome<()> {
        let interruptible = point.interruption().is_some();

        for entry in entries {
            let id = entry.id();

            if self.is_muted(id.as_str()) {
                trace!(handler = %id, "Handler muted, skipping");
                skip(result, timeline, id, SkipReason::Muted);
                continue;
            }

            if !self.breaker.is_available(id) {
                debug!(handler = %id, "Circuit open, skipping");
                skip(result, timeline, id, SkipReason::CircuitOpen);
                continue;
            }

            let handler = match self.resolve(entry, key) {
                Ok(handler) => handler,
                Err(err) => {
                    self.unprepared(flags, id, err, result, timeline)?;
                    continue;
                }
            };

            if let Some(plan) = entry.queue_plan() {
                match self.enqueue(handler, plan, key, point) {
                    Ok(()) => {
                        trace!(handler = %id, "Handler queued");
                        skip(result, timeline, id, SkipReason::Queued);
                    }
                    Err(QueueError::Duplicate(unique)) => {
                        debug!(handler = %id, unique_key = %unique, "Duplicate job dropped");
                        skip(result, timeline, id, SkipReason::Queued);
                    }
                    Err(err) => self.unprepared(flags, id, err.into(), result, timeline)?,
                }
                continue;
            }

            trace!(handler = %id, priority = entry.priority(), "Invoking handler");
            let started = Instant::now();
            let outcome = handler.call(&mut *point);
            let elapsed = started.elapsed();

            match outcome {
                Ok(value) => {
                    self.breaker.record_success(id);
                    let veto = interruptible && value == Value::Bool(false);
                    let satisfied = strategy.is_some_and(|strategy| strategy.should_stop(&value));

                    note(timeline, id, elapsed, || Outcome::Success(value.clone()));
                    result.record_success(id.clone(), value);

                    if veto && let Some(state) = point.interruption_mut() {
                        state.interrupt(id.clone());
                    }
                    if halted(point, result) {
                        break;
                    }
                    if satisfied {
                        trace!(handler = %id, "Result strategy satisfied, stopping");
                        break;
                    }
                }
                Err(err) => {
                    self.breaker.record_failure(id);
                    note(timeline, id, elapsed, || Outcome::Error(err.to_string()));
                    let failure = HandlerFailure::new(id.clone(), err);

                    if !flags.graceful {
                        return Err(failure.into());
                    }
                    warn!(handler = %id, error = %failure, "Handler failed, continuing");
                    result.record_error(failure);
                    if halted(point, result) {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn resolve(&self, entry: &HandlerEntry, key: &PointKey) -> DispatchOutcome<BoxedHandler> {
        match entry.handler() {
            HandlerRef::Instance(handler) => Ok(Arc::clone(handler)),
            HandlerRef::Deferred(id) => {
                let handler = self
                    .resolver
                    .as_ref()
                    .and_then(|resolver| resolver.resolve(id))
                    .ok_or_else(|| DispatchError::Unresolved {
                        handler: id.clone(),
                    })?;
                validator::check_signature(key, handler.as_ref())?;
                Ok(handler)
            }
        }
    }

    fn enqueue<P: ExtensionPoint>(
        &self,
        handler: BoxedHandler,
        plan: &QueuePlan,
        key: &PointKey,
        point: &P,
    ) -> Result<(), QueueError> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| QueueError::NotConfigured(handler.id().clone()))?;
        let payload = (plan.snapshot)(point as &dyn Any)
            .ok_or(QueueError::Payload { point: key.name() })?;

        queue.enqueue(QueuedCall::new(
            handler,
            key.name(),
            payload,
            plan,
            &self.config.default_queue,
        ))
    }

    /// A handler that could not be resolved or queued: abort, or record it
    /// as a failure in graceful mode.
    fn unprepared(
        &self,
        flags: Flags,
        id: &HandlerId,
        err: DispatchError,
        result: &mut DispatchResult,
        timeline: &mut Option<DebugInfo>,
    ) -> DispatchOutcome<()> {
        if !flags.graceful {
            return Err(err);
        }
        warn!(handler = %id, error = %err, "Handler could not run, continuing");
        note(timeline, id, Duration::ZERO, || Outcome::Error(err.to_string()));
        result.record_error(HandlerFailure::new(id.clone(), Box::new(err)));
        Ok(())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("breaker", &self.breaker)
            .field("config", &self.config)
            .field("muted", &self.muted.read().len())
            .field("silenced", &self.is_silenced())
            .finish()
    }
}

/// Copies an interruption set on `point` into `result`. Handlers may veto by
/// returning `false` or by interrupting the point's state directly.
fn halted<P: ExtensionPoint>(point: &P, result: &mut DispatchResult) -> bool {
    let Some(by) = point.interruption().and_then(InterruptibleState::interrupted_by) else {
        return false;
    };
    debug!(handler = %by, "Dispatch interrupted");
    result.record_interruption(by.clone());
    true
}

fn skip(
    result: &mut DispatchResult,
    timeline: &mut Option<DebugInfo>,
    id: &HandlerId,
    reason: SkipReason,
) {
    note(timeline, id, Duration::ZERO, || Outcome::Skipped(reason));
    result.record_skip(id.clone(), reason);
}

fn note(
    timeline: &mut Option<DebugInfo>,
    id: &HandlerId,
    duration: Duration,
    outcome: impl FnOnce() -> Outcome,
) {
    if let Some(info) = timeline {
        info.push(id.clone(), duration, outcome());
    }
}

// ============================================================================
// Scoped state guards
// ============================================================================

struct MuteGuard<'a> {
    muted: &'a RwLock<HashSet<HandlerId>>,
    added: Vec<HandlerId>,
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        let mut muted = self.muted.write();
        for id in &self.added {
            muted.remove(id);
        }
    }
}

struct SilenceGuard<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for SilenceGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// DispatchCall
// ============================================================================

/// One dispatch call with its own flags.
///
/// Created by [`Dispatcher::call`]; the flags start at the dispatcher's
/// configuration and apply to this call only.
#[must_use = "a DispatchCall does nothing until one of its dispatch methods runs"]
pub struct DispatchCall<'d> {
    dispatcher: &'d Dispatcher,
    flags: Flags,
}

impl DispatchCall<'_> {
    /// Collects handler failures instead of aborting.
    pub fn graceful(mut self, enabled: bool) -> Self {
        self.flags.graceful = enabled;
        self
    }

    /// Fails if no handler is registered for the point.
    pub fn strict(mut self, enabled: bool) -> Self {
        self.flags.strict = enabled;
        self
    }

    /// Records a timeline and hands it to the diagnostics sink.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.flags.debug = enabled;
        self
    }

    /// Dispatches `point` and notifies. Returns the point.
    pub fn dispatch<P: ExtensionPoint>(self, mut point: P) -> DispatchOutcome<P> {
        self.dispatcher.run(self.flags, &mut point, true, None)?;
        Ok(point)
    }

    /// Dispatches an interruptible point and notifies.
    ///
    /// Returns `false` if a handler vetoed.
    pub fn dispatch_interruptible<P: Interruptible>(self, point: &mut P) -> DispatchOutcome<bool> {
        let result = self.dispatcher.run(self.flags, point, true, None)?;
        Ok(!result.is_interrupted())
    }

    /// Dispatches `point` without notifying.
    pub fn dispatch_silent<P: ExtensionPoint>(self, mut point: P) -> DispatchOutcome<P> {
        self.dispatcher.run(self.flags, &mut point, false, None)?;
        Ok(point)
    }

    /// Dispatches an interruptible point without notifying.
    pub fn dispatch_interruptible_silent<P: Interruptible>(
        self,
        point: &mut P,
    ) -> DispatchOutcome<bool> {
        let result = self.dispatcher.run(self.flags, point, false, None)?;
        Ok(!result.is_interrupted())
    }

    /// Dispatches `point`, recording what every handler did.
    ///
    /// Outside graceful mode the first failure still aborts, and the partial
    /// record is dropped.
    pub fn dispatch_with_results<P: ExtensionPoint>(
        self,
        point: &mut P,
    ) -> DispatchOutcome<DispatchResult> {
        self.dispatcher.run(self.flags, point, true, None)
    }

    /// Dispatches `point` and folds handler results with `strategy`.
    ///
    /// Stops invoking handlers once the strategy reports it is satisfied.
    pub fn dispatch_aggregate<P: ExtensionPoint>(
        self,
        point: &mut P,
        strategy: &dyn ResultStrategy,
    ) -> DispatchOutcome<Value> {
        let result = self.dispatcher.run(self.flags, point, true, Some(strategy))?;
        Ok(result.aggregate(strategy))
    }
}

impl fmt::Debug for DispatchCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchCall")
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::config::CircuitBreakerConfig;
    use crate::handler::{Handler, handler_fn};
    use crate::notify::EventBus;
    use crate::point::InterruptibleState;
    use crate::queue::{MemoryQueue, QueueOptions};
    use crate::resolver::FactoryResolver;
    use crate::strategy::{First, Merge};

    #[derive(Debug, Clone, Default)]
    struct Saving {
        log: Vec<&'static str>,
        state: InterruptibleState,
    }

    impl ExtensionPoint for Saving {
        fn point_name() -> &'static str {
            "record.saving"
        }

        fn interruption(&self) -> Option<&InterruptibleState> {
            Some(&self.state)
        }

        fn interruption_mut(&mut self) -> Option<&mut InterruptibleState> {
            Some(&mut self.state)
        }
    }

    impl Interruptible for Saving {}

    #[derive(Debug, Clone, Default)]
    struct Saved {
        log: Vec<&'static str>,
    }

    impl ExtensionPoint for Saved {
        fn point_name() -> &'static str {
            "record.saved"
        }
    }

    fn push(name: &'static str) -> impl Handler<Point = Saving> {
        handler_fn(name, move |p: &mut Saving| p.log.push(name))
    }

    fn veto(name: &'static str) -> impl Handler<Point = Saving> {
        handler_fn(name, move |p: &mut Saving| {
            p.log.push(name);
            false
        })
    }

    fn fail(name: &'static str) -> impl Handler<Point = Saving> {
        handler_fn(name, move |p: &mut Saving| {
            p.log.push(name);
            Err::<(), _>("boom")
        })
    }

    fn setup() -> (Arc<PriorityRegistry>, Dispatcher) {
        let registry = Arc::new(PriorityRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        (registry, dispatcher)
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<Value>>,
    }

    impl DiagnosticsSink for CollectingSink {
        fn record(&self, info: &DebugInfo) {
            self.records.lock().push(info.to_json());
        }
    }

    #[test]
    fn test_handlers_run_in_priority_order() {
        let (registry, dispatcher) = setup();
        registry.register(push("c"), 30);
        registry.register(push("a"), 10);
        registry.register(push("b"), 20);

        let point = dispatcher.dispatch(Saving::default()).unwrap();
        assert_eq!(point.log, ["a", "b", "c"]);
    }

    #[test]
    fn test_false_interrupts_remaining_handlers() {
        let (registry, dispatcher) = setup();
        registry.register(push("A"), 10);
        registry.register(veto("B"), 20);
        registry.register(push("C"), 30);

        let mut point = Saving::default();
        assert!(!dispatcher.dispatch_interruptible(&mut point).unwrap());
        assert_eq!(point.log, ["A", "B"]);
        assert!(point.is_interrupted());
        assert_eq!(point.interrupted_by().unwrap().as_str(), "B");
    }

    #[test]
    fn test_false_on_plain_point_is_just_a_result() {
        let (registry, dispatcher) = setup();
        registry.register(handler_fn("no", |p: &mut Saved| {
            p.log.push("no");
            false
        }), 10);
        registry.register(handler_fn("yes", |p: &mut Saved| p.log.push("yes")), 20);

        let mut point = Saved::default();
        let result = dispatcher.dispatch_with_results(&mut point).unwrap();
        assert_eq!(point.log, ["no", "yes"]);
        assert!(!result.is_interrupted());
        assert_eq!(result.success("no"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_other_values_do_not_interrupt() {
        let (registry, dispatcher) = setup();
        registry.register(handler_fn("null", |_: &mut Saving| Value::Null), 10);
        registry.register(handler_fn("zero", |_: &mut Saving| 0_i64), 20);
        registry.register(push("last"), 30);

        let mut point = Saving::default();
        assert!(dispatcher.dispatch_interruptible(&mut point).unwrap());
        assert_eq!(point.log, ["last"]);
    }

    #[test]
    fn test_interruption_resets_between_dispatches() {
        let (registry, dispatcher) = setup();
        registry.register(veto("guard"), 10);

        let mut point = Saving::default();
        assert!(!dispatcher.dispatch_interruptible(&mut point).unwrap());

        dispatcher.mute("guard");
        assert!(dispatcher.dispatch_interruptible(&mut point).unwrap());
        assert!(!point.is_interrupted());
        assert!(point.interrupted_by().is_none());
    }

    #[test]
    fn test_direct_interrupt_stops_the_chain() {
        let (registry, dispatcher) = setup();
        registry.register(handler_fn("A", |p: &mut Saving| {
            p.log.push("A");
            p.state.interrupt(HandlerId::new("A"));
        }), 10);
        registry.register(push("B"), 20);

        let mut point = Saving::default();
        let completed = dispatcher.dispatch_interruptible(&mut point).unwrap();
        assert_eq!(completed, !point.is_interrupted());
        assert!(!completed);
        assert_eq!(point.log, ["A"]);

        let result = dispatcher.dispatch_with_results(&mut point).unwrap();
        assert_eq!(result.interrupted_by().map(HandlerId::as_str), Some("A"));
        assert!(result.success("A").is_some());
    }

    #[test]
    fn test_interrupt_before_failing_stops_graceful_chain() {
        let (registry, dispatcher) = setup();
        registry.register(handler_fn("guard", |p: &mut Saving| {
            p.state.interrupt(HandlerId::new("guard"));
            Err::<(), _>("rejected")
        }), 10);
        registry.register(push("after"), 20);

        let mut point = Saving::default();
        let result = dispatcher
            .call()
            .graceful(true)
            .dispatch_with_results(&mut point)
            .unwrap();
        assert!(point.log.is_empty());
        assert!(result.error("guard").is_some());
        assert_eq!(result.interrupted_by().map(HandlerId::as_str), Some("guard"));
    }

    #[test]
    fn test_graceful_collects_failures() {
        let (registry, dispatcher) = setup();
        registry.register(fail("A"), 10);
        registry.register(handler_fn("B", |p: &mut Saving| {
            p.log.push("B");
            "done"
        }), 20);

        let mut point = Saving::default();
        let result = dispatcher
            .call()
            .graceful(true)
            .dispatch_with_results(&mut point)
            .unwrap();

        assert_eq!(point.log, ["A", "B"]);
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.error("A").unwrap().to_string(), "boom");
        assert_eq!(result.success("B"), Some(&json!("done")));
    }

    #[test]
    fn test_non_graceful_failure_propagates_original_error() {
        let (registry, dispatcher) = setup();
        registry.register(fail("A"), 10);
        registry.register(push("B"), 20);

        let mut point = Saving::default();
        let err = dispatcher.dispatch_with_results(&mut point).unwrap_err();

        assert_eq!(point.log, ["A"]);
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.handler().unwrap().as_str(), "A");
        assert!(matches!(err, DispatchError::Handler(_)));
    }

    #[test]
    fn test_veto_wins_in_graceful_mode() {
        let (registry, dispatcher) = setup();
        registry.register(fail("A"), 10);
        registry.register(veto("B"), 20);
        registry.register(push("C"), 30);

        let mut point = Saving::default();
        let result = dispatcher
            .call()
            .graceful(true)
            .dispatch_with_results(&mut point)
            .unwrap();

        assert_eq!(point.log, ["A", "B"]);
        assert!(result.is_interrupted());
        assert_eq!(result.interrupted_by().unwrap().as_str(), "B");
    }

    #[test]
    fn test_call_flags_do_not_leak() {
        let (registry, dispatcher) = setup();
        registry.register(fail("A"), 10);

        let mut point = Saving::default();
        assert!(dispatcher.call().graceful(true).dispatch_with_results(&mut point).is_ok());
        assert!(dispatcher.dispatch_with_results(&mut point).is_err());
    }

    #[test]
    fn test_strict_mode_requires_handlers() {
        let (registry, dispatcher) = setup();

        let err = dispatcher.call().strict(true).dispatch(Saved::default()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::StrictModeViolation { point: "record.saved" }
        ));
        assert!(dispatcher.dispatch(Saved::default()).is_ok());

        registry.register(handler_fn("any", |_: &mut Saved| {}), 10);
        assert!(dispatcher.call().strict(true).dispatch(Saved::default()).is_ok());
    }

    #[test]
    fn test_strict_mode_from_config() {
        let registry = Arc::new(PriorityRegistry::new());
        let dispatcher = Dispatcher::new(registry).with_config(DispatcherConfig {
            strict: true,
            ..DispatcherConfig::default()
        });

        assert!(dispatcher.dispatch(Saved::default()).is_err());
        assert!(dispatcher.call().strict(false).dispatch(Saved::default()).is_ok());
    }

    #[test]
    fn test_muted_handler_is_skipped() {
        let (registry, dispatcher) = setup();
        registry.register(push("a"), 10);
        registry.register(push("b"), 20);

        dispatcher.mute("b");
        let mut point = Saving::default();
        let result = dispatcher.dispatch_with_results(&mut point).unwrap();
        assert_eq!(point.log, ["a"]);
        assert_eq!(result.skip_reason("b"), Some(SkipReason::Muted));
        assert!(result.success("b").is_none());
        assert!(result.error("b").is_none());

        dispatcher.unmute("b");
        let mut point = Saving::default();
        let result = dispatcher.dispatch_with_results(&mut point).unwrap();
        assert_eq!(point.log, ["a", "b"]);
        assert!(result.skipped().is_empty());
    }

    #[test]
    fn test_scoped_mute_restores_previous_set() {
        let (registry, dispatcher) = setup();
        registry.register(push("a"), 10);
        registry.register(push("b"), 20);
        dispatcher.mute("a");

        let point = dispatcher.muted(["b"], |d| {
            assert!(d.is_muted("a") && d.is_muted("b"));
            d.dispatch(Saving::default()).unwrap()
        });
        assert!(point.log.is_empty());
        assert!(dispatcher.is_muted("a"));
        assert!(!dispatcher.is_muted("b"));
    }

    #[test]
    fn test_silenced_dispatch_is_a_no_op() {
        let (registry, dispatcher) = setup();
        let bus = Arc::new(EventBus::new());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        bus.subscribe(move |_: &Saving| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let dispatcher = dispatcher.with_notifier(bus);
        registry.register(veto("a"), 10);

        dispatcher.silence_on();
        let mut point = Saving::default();
        assert!(dispatcher.dispatch_interruptible(&mut point).unwrap());
        let result = dispatcher.dispatch_with_results(&mut point).unwrap();
        assert!(point.log.is_empty());
        assert!(result.successes().is_empty() && result.skipped().is_empty());
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        dispatcher.resume();
        dispatcher.dispatch_interruptible(&mut point).unwrap();
        assert_eq!(point.log, ["a"]);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_silence_restores_state_after_panic() {
        let (registry, dispatcher) = setup();
        registry.register(push("a"), 10);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            dispatcher.silence(|d| {
                if d.is_silenced() {
                    panic!("import failed");
                }
            })
        }));
        assert!(outcome.is_err());
        assert!(!dispatcher.is_silenced());

        let point = dispatcher.silence(|d| d.dispatch(Saving::default()).unwrap());
        assert!(point.log.is_empty());
        assert!(!dispatcher.is_silenced());
    }

    #[test]
    fn test_nested_silence_keeps_outer_state() {
        let (_, dispatcher) = setup();
        dispatcher.silence(|d| {
            d.silence(|_| {});
            assert!(d.is_silenced());
        });
        assert!(!dispatcher.is_silenced());
    }

    #[test]
    fn test_scoped_mute_keeps_mutes_made_elsewhere() {
        let (_, dispatcher) = setup();
        std::thread::scope(|threads| {
            let other = &dispatcher;
            dispatcher.muted(["x"], |_| {
                threads.spawn(move || other.mute("y")).join().unwrap();
            });
        });
        assert!(!dispatcher.is_muted("x"));
        assert!(dispatcher.is_muted("y"));
    }

    #[test]
    fn test_silence_scope_keeps_silence_on_made_inside() {
        let (_, dispatcher) = setup();
        dispatcher.silence(|d| d.silence_on());
        assert!(dispatcher.is_silenced());

        dispatcher.resume();
        dispatcher.silence(|d| {
            d.resume();
            assert!(d.is_silenced());
        });
        assert!(!dispatcher.is_silenced());
    }

    #[test]
    fn test_open_circuit_skips_handler() {
        let registry = Arc::new(PriorityRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry)).with_config(DispatcherConfig {
            graceful: true,
            circuit_breaker: CircuitBreakerConfig {
                threshold: 2,
                ..CircuitBreakerConfig::default()
            },
            ..DispatcherConfig::default()
        });
        registry.register(fail("flaky"), 10);
        registry.register(push("steady"), 20);

        for _ in 0..2 {
            let mut point = Saving::default();
            let result = dispatcher.dispatch_with_results(&mut point).unwrap();
            assert!(result.error("flaky").is_some());
        }

        let mut point = Saving::default();
        let result = dispatcher.dispatch_with_results(&mut point).unwrap();
        assert_eq!(point.log, ["steady"]);
        assert_eq!(result.skip_reason("flaky"), Some(SkipReason::CircuitOpen));
        assert!(!dispatcher.breaker().is_available(&HandlerId::new("flaky")));
    }

    #[test]
    fn test_veto_does_not_trip_breaker() {
        let registry = Arc::new(PriorityRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry)).with_config(DispatcherConfig {
            circuit_breaker: CircuitBreakerConfig {
                threshold: 1,
                ..CircuitBreakerConfig::default()
            },
            ..DispatcherConfig::default()
        });
        registry.register(veto("guard"), 10);

        for _ in 0..3 {
            let mut point = Saving::default();
            assert!(!dispatcher.dispatch_interruptible(&mut point).unwrap());
        }
        assert!(dispatcher.breaker().is_available(&HandlerId::new("guard")));
    }

    #[test]
    fn test_queued_handler_is_handed_off() {
        let (registry, dispatcher) = setup();
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = dispatcher.with_queue(queue.clone());
        registry.register_queued(push("mail"), 10, QueueOptions::new().on("mail"));
        registry.register(push("inline"), 20);

        let mut point = Saving::default();
        let result = dispatcher.dispatch_with_results(&mut point).unwrap();

        assert_eq!(point.log, ["inline"]);
        assert_eq!(result.skip_reason("mail"), Some(SkipReason::Queued));
        assert_eq!(queue.len(), 1);

        let calls = queue.drain();
        assert_eq!(calls[0].queue(), "mail");
        assert_eq!(calls[0].point_name(), "record.saving");
        assert!(calls[0].run().is_ok());
    }

    #[test]
    fn test_queued_handler_uses_default_queue() {
        let (registry, dispatcher) = setup();
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = dispatcher.with_queue(queue.clone());
        registry.register_queued(push("mail"), 10, QueueOptions::new());

        dispatcher.dispatch(Saving::default()).unwrap();
        assert_eq!(queue.drain()[0].queue(), "default");
    }

    #[test]
    fn test_queued_handler_without_queue() {
        let (registry, dispatcher) = setup();
        registry.register_queued(push("mail"), 10, QueueOptions::new());

        let mut point = Saving::default();
        let err = dispatcher.dispatch_with_results(&mut point).unwrap_err();
        assert!(matches!(err, DispatchError::Queue(QueueError::NotConfigured(_))));

        let result = dispatcher
            .call()
            .graceful(true)
            .dispatch_with_results(&mut point)
            .unwrap();
        assert!(result.error("mail").is_some());
    }

    #[test]
    fn test_deferred_handler_is_resolved() {
        let (registry, dispatcher) = setup();
        let resolver = Arc::new(FactoryResolver::new());
        resolver.factory("lazy", || push("lazy"));
        let dispatcher = dispatcher.with_resolver(resolver);
        registry.register_deferred::<Saving>("lazy", 10);

        let point = dispatcher.dispatch(Saving::default()).unwrap();
        assert_eq!(point.log, ["lazy"]);
    }

    #[test]
    fn test_unresolved_handler() {
        let (registry, dispatcher) = setup();
        registry.register_deferred::<Saving>("ghost", 10);
        registry.register(push("real"), 20);

        let err = dispatcher.dispatch(Saving::default()).unwrap_err();
        assert!(matches!(err, DispatchError::Unresolved { .. }));

        let mut point = Saving::default();
        let result = dispatcher
            .call()
            .graceful(true)
            .dispatch_with_results(&mut point)
            .unwrap();
        assert_eq!(point.log, ["real"]);
        assert!(result.error("ghost").is_some());
    }

    #[test]
    fn test_resolved_handler_for_wrong_point() {
        let (registry, dispatcher) = setup();
        let resolver = Arc::new(FactoryResolver::new());
        resolver.instance("other", handler_fn("other", |_: &mut Saved| {}));
        let dispatcher = dispatcher.with_resolver(resolver);
        registry.register_deferred::<Saving>("other", 10);

        let err = dispatcher.dispatch(Saving::default()).unwrap_err();
        assert!(matches!(err, DispatchError::Registry(_)));
        assert_eq!(err.handler().unwrap().as_str(), "other");
    }

    #[test]
    fn test_silent_variants_skip_notification() {
        let (registry, dispatcher) = setup();
        let bus = Arc::new(EventBus::new());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        bus.subscribe(move |_: &Saving| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let dispatcher = dispatcher.with_notifier(bus);
        registry.register(push("a"), 10);

        let mut point = dispatcher.dispatch_silent(Saving::default()).unwrap();
        dispatcher.dispatch_interruptible_silent(&mut point).unwrap();
        assert_eq!(point.log, ["a", "a"]);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(Saving::default()).unwrap();
        dispatcher.dispatch_interruptible(&mut point).unwrap();
        dispatcher.dispatch_with_results(&mut point).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_notification_sees_mutated_point() {
        let (registry, dispatcher) = setup();
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |point: &Saving| sink.lock().extend(point.log.iter().copied()));
        let dispatcher = dispatcher.with_notifier(bus);
        registry.register(push("a"), 10);

        dispatcher.dispatch(Saving::default()).unwrap();
        assert_eq!(*seen.lock(), ["a"]);
    }

    #[test]
    fn test_failed_dispatch_does_not_notify() {
        let (registry, dispatcher) = setup();
        let bus = Arc::new(EventBus::new());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        bus.subscribe(move |_: &Saving| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let dispatcher = dispatcher.with_notifier(bus);
        registry.register(fail("a"), 10);

        assert!(dispatcher.dispatch(Saving::default()).is_err());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_aggregate_first_stops_early() {
        let (registry, dispatcher) = setup();
        registry.register(handler_fn("none", |p: &mut Saved| {
            p.log.push("none");
            Value::Null
        }), 10);
        registry.register(handler_fn("x", |p: &mut Saved| {
            p.log.push("x");
            "x"
        }), 20);
        registry.register(handler_fn("y", |p: &mut Saved| {
            p.log.push("y");
            "y"
        }), 30);

        let mut point = Saved::default();
        let value = dispatcher.dispatch_aggregate(&mut point, &First).unwrap();
        assert_eq!(value, json!("x"));
        assert_eq!(point.log, ["none", "x"]);

        let mut point = Saved::default();
        let value = dispatcher.dispatch_aggregate(&mut point, &Merge::new()).unwrap();
        assert_eq!(value, json!(["x", "y"]));
        assert_eq!(point.log, ["none", "x", "y"]);
    }

    #[test]
    fn test_debug_timeline_reaches_sink() {
        let (registry, dispatcher) = setup();
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = dispatcher.with_diagnostics(sink.clone());
        registry.register(push("a"), 10);
        registry.register(push("b"), 20);
        registry.register(veto("c"), 30);
        dispatcher.mute("b");

        dispatcher.dispatch(Saving::default()).unwrap();
        assert!(sink.records.lock().is_empty());

        dispatcher.call().debug(true).dispatch(Saving::default()).unwrap();
        let records = sink.records.lock();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record["extension_point"], "record.saving");
        assert_eq!(record["interrupted_by"], "c");
        assert_eq!(record["per_handler"][0]["outcome"]["status"], "success");
        assert_eq!(record["per_handler"][1]["outcome"]["reason"], "muted");
        assert_eq!(record["per_handler"][2]["outcome"]["result"], false);
    }

    #[test]
    fn test_dispatcher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Dispatcher>();
    }
}
