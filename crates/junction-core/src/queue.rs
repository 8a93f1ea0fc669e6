//! Hand-off of asynchronous handlers to an external queue.
//!
//! The dispatcher never runs a queued handler inline. It snapshots the point,
//! packs a [`QueuedCall`], and passes it to whatever [`QueueHandoff`] the host
//! configured. Completion is never observed by the originating dispatch.
//!
//! Retry and backoff are the substrate's concern; [`QueueOptions`] only
//! carries the caller's wishes.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::handler::{BoxedHandler, HandlerId, HandlerResult};

/// Per-handler options forwarded to the queue substrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Target queue. `None` uses the dispatcher's default queue.
    #[serde(default)]
    pub queue: Option<String>,

    /// Delay before the first attempt.
    #[serde(default)]
    pub delay: Option<Duration>,

    /// Number of retries after a failed attempt.
    #[serde(default)]
    pub retries: u32,

    /// Base backoff between retries.
    #[serde(default)]
    pub backoff: Option<Duration>,

    /// Jobs sharing a live unique key are deduplicated by the substrate.
    #[serde(default)]
    pub unique_key: Option<String>,

    /// How long a unique key stays live.
    #[serde(default)]
    pub unique_ttl: Option<Duration>,
}

impl QueueOptions {
    /// Options with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes the call to a named queue.
    pub fn on(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Delays the first attempt.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the retry budget and base backoff.
    pub fn retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = Some(backoff);
        self
    }

    /// Deduplicates calls sharing `key` for `ttl`.
    pub fn unique(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.unique_key = Some(key.into());
        self.unique_ttl = Some(ttl);
        self
    }
}

/// Clones a type-erased point into an owned payload.
pub(crate) type Snapshot = fn(&dyn Any) -> Option<Box<dyn Any + Send>>;

pub(crate) fn snapshot_of<P: Clone + Send + 'static>(point: &dyn Any) -> Option<Box<dyn Any + Send>> {
    point
        .downcast_ref::<P>()
        .map(|point| Box::new(point.clone()) as Box<dyn Any + Send>)
}

/// How a registered entry is queued instead of run inline.
#[derive(Clone)]
pub(crate) struct QueuePlan {
    pub(crate) options: QueueOptions,
    pub(crate) snapshot: Snapshot,
}

impl fmt::Debug for QueuePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuePlan")
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// Queued Call
// ============================================================================

/// A handler invocation handed to the queue substrate.
pub struct QueuedCall {
    handler: BoxedHandler,
    point_name: &'static str,
    payload: Box<dyn Any + Send>,
    snapshot: Snapshot,
    queue: String,
    options: QueueOptions,
}

impl QueuedCall {
    pub(crate) fn new(
        handler: BoxedHandler,
        point_name: &'static str,
        payload: Box<dyn Any + Send>,
        plan: &QueuePlan,
        default_queue: &str,
    ) -> Self {
        let queue = plan
            .options
            .queue
            .clone()
            .unwrap_or_else(|| default_queue.to_string());
        Self {
            handler,
            point_name,
            payload,
            snapshot: plan.snapshot,
            queue,
            options: plan.options.clone(),
        }
    }

    /// The queued handler's identity.
    pub fn handler_id(&self) -> &HandlerId {
        self.handler.id()
    }

    /// Name of the point type the payload belongs to.
    pub fn point_name(&self) -> &'static str {
        self.point_name
    }

    /// The queue this call targets.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The caller's queueing options.
    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Borrows the payload snapshot, for substrates that inspect or persist it.
    pub fn payload(&self) -> &(dyn Any + Send) {
        self.payload.as_ref()
    }

    /// Runs the handler once against a fresh copy of the payload.
    ///
    /// Every attempt starts from the snapshot taken at dispatch time, so a
    /// retried attempt never observes mutations made by a failed one.
    pub fn run(&self) -> HandlerResult {
        let payload: &dyn Any = self.payload.as_ref();
        match (self.snapshot)(payload) {
            Some(mut copy) => self.handler.call(copy.as_mut()),
            None => Err(format!(
                "queued payload for '{}' is not a '{}'",
                self.handler.id(),
                self.point_name
            )
            .into()),
        }
    }
}

impl fmt::Debug for QueuedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedCall")
            .field("handler", self.handler.id())
            .field("point", &self.point_name)
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// Queue Hand-off
// ============================================================================

/// The queue substrate the dispatcher hands asynchronous handlers to.
///
/// Fire-and-forget: an `Ok` only means the call was accepted.
pub trait QueueHandoff: Send + Sync {
    /// Accepts a call for out-of-band execution.
    fn enqueue(&self, call: QueuedCall) -> Result<(), QueueError>;
}

/// An in-memory queue that only collects calls.
///
/// Useful for tests and for hosts that drain work at a point of their
/// choosing.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    calls: Mutex<VecDeque<QueuedCall>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether no calls are pending.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Removes and returns all pending calls in arrival order.
    pub fn drain(&self) -> Vec<QueuedCall> {
        self.calls.lock().drain(..).collect()
    }

    /// Runs every pending call inline, returning each handler's outcome.
    pub fn run_pending(&self) -> Vec<(HandlerId, HandlerResult)> {
        self.drain()
            .into_iter()
            .map(|call| (call.handler_id().clone(), call.run()))
            .collect()
    }
}

impl QueueHandoff for MemoryQueue {
    fn enqueue(&self, call: QueuedCall) -> Result<(), QueueError> {
        self.calls.lock().push_back(call);
        Ok(())
    }
}
