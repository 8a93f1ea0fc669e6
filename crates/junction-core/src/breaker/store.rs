//! Storage and time sources for circuit records.
//!
//! Records are meant to live in a resource shared between workers (an
//! external cache, typically). The [`CircuitBreakerStore`] trait is the seam:
//! the in-process [`MemoryStore`] backs single-process hosts and tests.
//!
//! Reads and the following writes are not transactional. Two workers failing
//! the same handler at once may both read `n` and both write `n + 1`, so a
//! shared circuit can open a few failures late. That is accepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use super::state::CircuitRecord;
use crate::handler::HandlerId;

/// Durable, shared storage for circuit records.
///
/// Implementations backed by a fallible resource should treat read failures
/// as "no record", which leaves the circuit closed.
pub trait CircuitBreakerStore: Send + Sync {
    /// Loads the record for `handler`.
    fn load(&self, handler: &HandlerId) -> Option<CircuitRecord>;

    /// Stores the record for `handler`.
    fn save(&self, handler: &HandlerId, record: CircuitRecord);

    /// Drops the record for `handler`.
    fn remove(&self, handler: &HandlerId);
}

/// An in-process record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<HandlerId, CircuitRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CircuitBreakerStore for MemoryStore {
    fn load(&self, handler: &HandlerId) -> Option<CircuitRecord> {
        self.records.read().get(handler).cloned()
    }

    fn save(&self, handler: &HandlerId, record: CircuitRecord) {
        self.records.write().insert(handler.clone(), record);
    }

    fn remove(&self, handler: &HandlerId) {
        self.records.write().remove(handler);
    }
}

// ============================================================================
// Clocks
// ============================================================================

/// Wall-clock source, in milliseconds since the Unix epoch.
///
/// Wall time rather than `Instant`, since records are shared across
/// processes.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now_millis(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
