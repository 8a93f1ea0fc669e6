//! A tokio-backed queue substrate.
//!
//! [`TokioQueue`] accepts [`QueuedCall`]s from the dispatcher without
//! blocking and runs them on a background worker:
//!
//! - each call waits out its `delay`, then runs on the blocking pool
//! - a failed attempt is retried up to `retries` times, doubling `backoff`
//! - a call with a live `unique_key` is rejected as a duplicate
//!
//! Dropping the queue or calling [`TokioQueue::shutdown`] cancels the worker;
//! calls still waiting on a delay or backoff are abandoned.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use junction_core::{QueueError, QueueHandoff, QueuedCall};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// Upper bound on a single backoff wait.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Counters of the work a [`TokioQueue`] has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Calls accepted by `enqueue`.
    pub accepted: u64,
    /// Calls whose handler eventually succeeded.
    pub completed: u64,
    /// Calls that failed on every attempt.
    pub failed: u64,
    /// Retry attempts made.
    pub retried: u64,
    /// Calls rejected as duplicates.
    pub deduplicated: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    deduplicated: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}

/// Live unique keys. `None` expiry lasts until the call finishes.
#[derive(Default)]
struct UniqueKeys {
    keys: Mutex<HashMap<String, Option<Instant>>>,
}

impl UniqueKeys {
    fn claim(&self, key: &str, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        keys.retain(|_, expiry| expiry.is_none_or(|at| at > now));
        if keys.contains_key(key) {
            return false;
        }
        keys.insert(key.to_string(), ttl.map(|ttl| now + ttl));
        true
    }

    fn release(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    /// Releases `key` only if it has no TTL of its own.
    fn finish(&self, key: &str) {
        let mut keys = self.keys.lock();
        if matches!(keys.get(key), Some(None)) {
            keys.remove(key);
        }
    }
}

struct Shared {
    name: String,
    unique: UniqueKeys,
    counters: Counters,
    // Accepted calls not yet finished or abandoned.
    pending: AtomicU64,
}

/// A queue substrate running calls on a tokio worker.
///
/// # Example
///
/// ```rust,ignore
/// let queue = Arc::new(TokioQueue::spawn("default", 1024)?);
/// let dispatcher = Dispatcher::new(registry).with_queue(queue.clone());
/// // ...
/// queue.shutdown().await;
/// ```
pub struct TokioQueue {
    shared: Arc<Shared>,
    sender: mpsc::Sender<QueuedCall>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
}

impl TokioQueue {
    /// Starts a worker on the current tokio runtime.
    pub fn spawn(name: impl Into<String>, capacity: usize) -> RuntimeResult<Self> {
        let handle = Handle::try_current().map_err(|_| RuntimeError::NoTokioRuntime)?;
        Ok(Self::spawn_on(&handle, name, capacity))
    }

    /// Starts a worker on `handle`.
    pub fn spawn_on(handle: &Handle, name: impl Into<String>, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            unique: UniqueKeys::default(),
            counters: Counters::default(),
            pending: AtomicU64::new(0),
        });
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn_on(
            worker(
                Arc::clone(&shared),
                receiver,
                shutdown_token.clone(),
                tracker.clone(),
                handle.clone(),
            ),
            handle,
        );

        info!(queue = %shared.name, capacity, "Queue worker started");
        Self {
            shared,
            sender,
            shutdown_token,
            tracker,
        }
    }

    /// The queue's name, used in errors and logs.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Work counters so far.
    pub fn stats(&self) -> QueueStats {
        self.shared.counters.snapshot()
    }

    /// Whether the worker has been cancelled.
    pub fn is_closed(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Waits until every accepted call has finished, without stopping the
    /// worker.
    pub async fn drain(&self) {
        while self.shared.pending.load(Ordering::Acquire) > 0 && !self.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stops the worker and waits for in-flight attempts to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(queue = %self.shared.name, "Queue worker stopped");
    }
}

impl QueueHandoff for TokioQueue {
    fn enqueue(&self, call: QueuedCall) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.shared.name.clone()));
        }

        let unique_key = call.options().unique_key.clone();
        if let Some(key) = &unique_key
            && !self.shared.unique.claim(key, call.options().unique_ttl)
        {
            self.shared.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %self.shared.name, key = %key, "Duplicate call rejected");
            return Err(QueueError::Duplicate(key.clone()));
        }

        let handler = call.handler_id().clone();
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(call) {
            Ok(()) => {
                self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(queue = %self.shared.name, handler = %handler, "Call queued");
                Ok(())
            }
            Err(err) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                if let Some(key) = &unique_key {
                    self.shared.unique.release(key);
                }
                Err(match err {
                    mpsc::error::TrySendError::Full(_) => {
                        QueueError::Full(self.shared.name.clone())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        QueueError::Closed(self.shared.name.clone())
                    }
                })
            }
        }
    }
}

impl Drop for TokioQueue {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

impl std::fmt::Debug for TokioQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioQueue")
            .field("name", &self.shared.name)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn worker(
    shared: Arc<Shared>,
    mut receiver: mpsc::Receiver<QueuedCall>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    handle: Handle,
) {
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            call = receiver.recv() => match call {
                Some(call) => {
                    tracker.spawn_on(
                        execute(Arc::clone(&shared), call, shutdown_token.clone()),
                        &handle,
                    );
                }
                None => break,
            },
        }
    }
    receiver.close();
    debug!(queue = %shared.name, "Queue worker loop exited");
}

/// Waits `duration` unless cancelled first. Returns `false` on cancellation.
async fn pause(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Backoff before retry number `attempt` (1-based).
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

async fn execute(shared: Arc<Shared>, call: QueuedCall, token: CancellationToken) {
    let unique_key = call.options().unique_key.clone();
    attempt_all(&shared, call, &token).await;

    if let Some(key) = &unique_key {
        shared.unique.finish(key);
    }
    shared.pending.fetch_sub(1, Ordering::AcqRel);
}

async fn attempt_all(shared: &Shared, mut call: QueuedCall, token: &CancellationToken) {
    let options = call.options().clone();
    let handler = call.handler_id().clone();
    let queue = call.queue().to_string();

    if let Some(delay) = options.delay
        && !pause(delay, token).await
    {
        debug!(handler = %handler, "Delayed call abandoned on shutdown");
        return;
    }

    let mut attempt = 0;
    loop {
        // The call moves onto the blocking pool and comes back with its result.
        let joined = tokio::task::spawn_blocking(move || {
            let result = call.run();
            (call, result)
        })
        .await;
        let result = match joined {
            Ok((returned, result)) => {
                call = returned;
                result
            }
            Err(join) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(queue = %queue, handler = %handler, error = %join, "Queued call panicked");
                return;
            }
        };

        match result {
            Ok(value) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    queue = %queue,
                    handler = %handler,
                    attempts = attempt + 1,
                    result = %value,
                    "Queued call completed"
                );
                return;
            }
            Err(error) if attempt < options.retries => {
                attempt += 1;
                shared.counters.retried.fetch_add(1, Ordering::Relaxed);
                let wait = backoff_for(options.backoff.unwrap_or_default(), attempt);
                warn!(
                    queue = %queue,
                    handler = %handler,
                    attempt,
                    retry_in_ms = wait.as_millis() as u64,
                    error = %error,
                    "Queued call failed, retrying"
                );
                if !pause(wait, token).await {
                    debug!(handler = %handler, "Retry abandoned on shutdown");
                    return;
                }
            }
            Err(error) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = %queue,
                    handler = %handler,
                    attempts = attempt + 1,
                    error = %error,
                    "Queued call failed"
                );
                return;
            }
        }
    }
}
