//! Per-dispatch records.
//!
//! - [`DispatchResult`] - what every handler did during one dispatch
//! - [`DebugInfo`] - an optional timeline, built only with diagnostics on

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::HandlerFailure;
use crate::handler::HandlerId;
use crate::strategy::ResultStrategy;

/// Why a handler was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The handler is in the dispatcher's muted set.
    Muted,
    /// The handler's circuit is open.
    CircuitOpen,
    /// The handler was handed to the queue instead of running inline.
    Queued,
}

impl SkipReason {
    /// The reason as recorded in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Muted => "muted",
            Self::CircuitOpen => "circuit_open",
            Self::Queued => "queued",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DispatchResult
// ============================================================================

/// What happened to each handler during one dispatch.
///
/// Records are kept in the order handlers were visited. A handler registered
/// twice appears twice.
#[derive(Debug, Default)]
pub struct DispatchResult {
    point: &'static str,
    successes: Vec<(HandlerId, Value)>,
    errors: Vec<HandlerFailure>,
    skipped: Vec<(HandlerId, SkipReason)>,
    interrupted: bool,
    interrupted_by: Option<HandlerId>,
}

impl DispatchResult {
    /// An empty record for a dispatch of `point`.
    pub fn new(point: &'static str) -> Self {
        Self {
            point,
            ..Self::default()
        }
    }

    pub(crate) fn record_success(&mut self, handler: HandlerId, value: Value) {
        self.successes.push((handler, value));
    }

    pub(crate) fn record_error(&mut self, failure: HandlerFailure) {
        self.errors.push(failure);
    }

    pub(crate) fn record_skip(&mut self, handler: HandlerId, reason: SkipReason) {
        self.skipped.push((handler, reason));
    }

    pub(crate) fn record_interruption(&mut self, handler: HandlerId) {
        if !self.interrupted {
            self.interrupted = true;
            self.interrupted_by = Some(handler);
        }
    }

    /// Name of the dispatched point.
    pub fn point_name(&self) -> &'static str {
        self.point
    }

    /// Successful handlers and their results.
    pub fn successes(&self) -> &[(HandlerId, Value)] {
        &self.successes
    }

    /// Failures collected in graceful mode.
    pub fn errors(&self) -> &[HandlerFailure] {
        &self.errors
    }

    /// Skipped handlers and why.
    pub fn skipped(&self) -> &[(HandlerId, SkipReason)] {
        &self.skipped
    }

    /// The first result recorded for `handler`.
    pub fn success(&self, handler: &str) -> Option<&Value> {
        self.successes
            .iter()
            .find(|(id, _)| id.as_str() == handler)
            .map(|(_, value)| value)
    }

    /// The first failure recorded for `handler`.
    pub fn error(&self, handler: &str) -> Option<&HandlerFailure> {
        self.errors
            .iter()
            .find(|failure| failure.handler().as_str() == handler)
    }

    /// Why `handler` was skipped, if it was.
    pub fn skip_reason(&self, handler: &str) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|(id, _)| id.as_str() == handler)
            .map(|(_, reason)| *reason)
    }

    /// Whether any handler failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether a handler vetoed the dispatch.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// The vetoing handler.
    pub fn interrupted_by(&self) -> Option<&HandlerId> {
        self.interrupted_by.as_ref()
    }

    /// Successful results in dispatch order.
    pub fn results(&self) -> Vec<Value> {
        self.successes.iter().map(|(_, value)| value.clone()).collect()
    }

    /// Folds the successful results with `strategy`.
    pub fn aggregate(&self, strategy: &dyn ResultStrategy) -> Value {
        strategy.aggregate(&self.results())
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed, {} skipped",
            self.point,
            self.successes.len(),
            self.errors.len(),
            self.skipped.len()
        )?;
        if let Some(handler) = &self.interrupted_by {
            write!(f, ", interrupted by {handler}")?;
        }
        Ok(())
    }
}

// ============================================================================
// DebugInfo
// ============================================================================

/// What one handler did, as seen by the timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Ran and returned a value.
    Success(Value),
    /// Ran and failed.
    Error(String),
    /// Did not run.
    Skipped(SkipReason),
}

impl Outcome {
    fn to_json(&self) -> Value {
        match self {
            Self::Success(value) => json!({ "status": "success", "result": value }),
            Self::Error(message) => json!({ "status": "error", "error": message }),
            Self::Skipped(reason) => json!({ "status": "skipped", "reason": reason.as_str() }),
        }
    }
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// The handler visited.
    pub handler: HandlerId,
    /// Time spent on it.
    pub duration: Duration,
    /// What it did.
    pub outcome: Outcome,
}

/// Timeline of one dispatch, built when diagnostics are enabled.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    point: &'static str,
    started: Instant,
    total: Option<Duration>,
    entries: Vec<TimelineEntry>,
    interrupted_by: Option<HandlerId>,
}

impl DebugInfo {
    /// Starts the clock for a dispatch of `point`.
    pub fn start(point: &'static str) -> Self {
        Self {
            point,
            started: Instant::now(),
            total: None,
            entries: Vec::new(),
            interrupted_by: None,
        }
    }

    pub(crate) fn push(&mut self, handler: HandlerId, duration: Duration, outcome: Outcome) {
        self.entries.push(TimelineEntry {
            handler,
            duration,
            outcome,
        });
    }

    pub(crate) fn finish(&mut self, interrupted_by: Option<HandlerId>) {
        self.total = Some(self.started.elapsed());
        self.interrupted_by = interrupted_by;
    }

    /// Name of the dispatched point.
    pub fn point_name(&self) -> &'static str {
        self.point
    }

    /// Per-handler entries in visit order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Wall time of the whole dispatch. Until finished, the time so far.
    pub fn total_duration(&self) -> Duration {
        self.total.unwrap_or_else(|| self.started.elapsed())
    }

    /// Whether the dispatch was vetoed.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted_by.is_some()
    }

    /// The vetoing handler.
    pub fn interrupted_by(&self) -> Option<&HandlerId> {
        self.interrupted_by.as_ref()
    }

    /// The structured record handed to diagnostics sinks.
    pub fn to_json(&self) -> Value {
        let per_handler: Vec<Value> = self
            .entries
            .iter()
            .map(|entry| {
                json!({
                    "handler": entry.handler,
                    "duration_ms": millis(entry.duration),
                    "outcome": entry.outcome.to_json(),
                })
            })
            .collect();

        json!({
            "extension_point": self.point,
            "total_duration_ms": millis(self.total_duration()),
            "per_handler": per_handler,
            "interrupted": self.is_interrupted(),
            "interrupted_by": self.interrupted_by,
        })
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}
