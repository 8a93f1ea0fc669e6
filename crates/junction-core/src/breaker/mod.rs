//! Per-handler circuit breaker.
//!
//! # States
//!
//! ```text
//! Closed   --failure_count >= threshold-------> Open
//! Open     --timeout elapsed (seen on read)----> HalfOpen
//! HalfOpen --half_open_max successes-----------> Closed (failure_count reset)
//! HalfOpen --any failure-----------------------> Open (immediately)
//! ```
//!
//! Reads never persist anything: an `Open` record whose timeout has elapsed is
//! *reported* as `HalfOpen`, and only the next `record_*` call writes the
//! transition. A failure while half-open reopens the circuit at once; it is
//! not averaged into the failure counter.

mod state;
mod store;

pub use state::{CircuitRecord, CircuitState};
pub use store::{CircuitBreakerStore, Clock, ManualClock, MemoryStore, SystemClock};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::handler::HandlerId;

/// The Closed/Open/HalfOpen decision logic over a shared record store.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    store: Arc<dyn CircuitBreakerStore>,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a breaker over an in-process store and the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a transparent breaker.
    pub fn disabled() -> Self {
        Self::new(CircuitBreakerConfig::disabled())
    }

    /// Uses a shared record store.
    pub fn with_store(mut self, store: Arc<dyn CircuitBreakerStore>) -> Self {
        self.store = store;
        self
    }

    /// Uses a custom time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether the breaker is active.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The effective record of `handler`, with the lazy Open to HalfOpen
    /// transition applied. Nothing is written.
    pub fn record(&self, handler: &HandlerId) -> CircuitRecord {
        let mut record = self.store.load(handler).unwrap_or_default();
        if record.state == CircuitState::Open && self.timeout_elapsed(&record) {
            record.state = CircuitState::HalfOpen;
        }
        record
    }

    /// The effective state of `handler`.
    pub fn state(&self, handler: &HandlerId) -> CircuitState {
        self.record(handler).state
    }

    /// Whether `handler` may run. `false` only while effectively open.
    pub fn is_available(&self, handler: &HandlerId) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.state(handler) != CircuitState::Open
    }

    fn timeout_elapsed(&self, record: &CircuitRecord) -> bool {
        let timeout_ms = self.config.timeout().as_millis() as u64;
        record
            .opened_at
            .is_some_and(|opened| self.clock.now_millis().saturating_sub(opened) >= timeout_ms)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Records a handler failure.
    pub fn record_failure(&self, handler: &HandlerId) {
        if !self.config.enabled {
            return;
        }

        let mut record = self.record(handler);
        record.failure_count = record.failure_count.saturating_add(1);

        match record.state {
            CircuitState::HalfOpen => {
                record.trip(self.clock.now_millis());
                warn!(
                    handler = %handler,
                    failure_count = record.failure_count,
                    "Recovery probe failed, circuit reopened"
                );
            }
            CircuitState::Closed if record.failure_count >= self.config.threshold => {
                record.trip(self.clock.now_millis());
                warn!(
                    handler = %handler,
                    failure_count = record.failure_count,
                    threshold = self.config.threshold,
                    "Failure threshold reached, circuit opened"
                );
            }
            _ => {
                debug!(
                    handler = %handler,
                    failure_count = record.failure_count,
                    state = %record.state,
                    "Recorded handler failure"
                );
            }
        }

        self.store.save(handler, record);
    }

    /// Records a handler success. Only meaningful while half-open.
    pub fn record_success(&self, handler: &HandlerId) {
        if !self.config.enabled {
            return;
        }

        let mut record = self.record(handler);
        if record.state != CircuitState::HalfOpen {
            return;
        }

        record.half_open_attempts += 1;
        if record.half_open_attempts >= self.config.half_open_max {
            record.heal();
            info!(handler = %handler, "Recovery confirmed, circuit closed");
        } else {
            debug!(
                handler = %handler,
                attempts = record.half_open_attempts,
                required = self.config.half_open_max,
                "Recovery probe succeeded"
            );
        }

        self.store.save(handler, record);
    }

    // ------------------------------------------------------------------
    // Operator overrides
    // ------------------------------------------------------------------

    /// Forces the circuit open, starting a fresh timeout.
    pub fn open(&self, handler: &HandlerId) {
        let mut record = self.store.load(handler).unwrap_or_default();
        record.trip(self.clock.now_millis());
        warn!(handler = %handler, "Circuit opened manually");
        self.store.save(handler, record);
    }

    /// Forces the circuit closed.
    pub fn close(&self, handler: &HandlerId) {
        info!(handler = %handler, "Circuit closed manually");
        self.store.save(handler, CircuitRecord::default());
    }

    /// Forgets everything recorded for `handler`.
    pub fn reset(&self, handler: &HandlerId) {
        debug!(handler = %handler, "Circuit reset");
        self.store.remove(handler);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .finish()
    }
}
