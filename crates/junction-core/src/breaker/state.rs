//! Circuit state and the per-handler record persisted in the store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; the handler runs.
    #[default]
    Closed,
    /// The handler failed too often and is skipped.
    Open,
    /// The open timeout elapsed; the handler runs as a recovery probe.
    HalfOpen,
}

impl CircuitState {
    /// The state name as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable failure record of one handler.
///
/// Invariants: `state == Open` implies `opened_at` is set, and
/// `failure_count` only returns to zero on a transition to `Closed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    /// The persisted state. Reads may report `HalfOpen` for an `Open` record
    /// whose timeout has elapsed.
    pub state: CircuitState,
    /// Failures counted since the circuit last closed.
    pub failure_count: u32,
    /// When the circuit opened, in milliseconds since the Unix epoch.
    pub opened_at: Option<u64>,
    /// Successful probes while half-open.
    pub half_open_attempts: u32,
}

impl CircuitRecord {
    /// Moves the record to `Open` at `now`.
    pub(crate) fn trip(&mut self, now: u64) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_attempts = 0;
    }

    /// Moves the record to `Closed`, clearing every counter.
    pub(crate) fn heal(&mut self) {
        *self = Self::default();
    }
}
