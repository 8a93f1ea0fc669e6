//! Diagnostics sinks for per-dispatch timelines.

use tracing::{debug, info};

use crate::result::{DebugInfo, Outcome};

/// Receives the [`DebugInfo`] of every dispatch made with diagnostics on.
pub trait DiagnosticsSink: Send + Sync {
    /// Records one finished dispatch.
    fn record(&self, info: &DebugInfo);
}

/// Emits each timeline as `tracing` events.
///
/// One `info` event summarizes the dispatch; per-handler entries follow at
/// `debug` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, info: &DebugInfo) {
        let total_ms = info.total_duration().as_secs_f64() * 1_000.0;
        info!(
            point = info.point_name(),
            total_ms,
            handlers = info.entries().len(),
            interrupted = info.is_interrupted(),
            interrupted_by = info.interrupted_by().map(|id| id.as_str()),
            "Dispatch finished"
        );

        for entry in info.entries() {
            let duration_ms = entry.duration.as_secs_f64() * 1_000.0;
            match &entry.outcome {
                Outcome::Success(result) => debug!(
                    point = info.point_name(),
                    handler = %entry.handler,
                    duration_ms,
                    result = %result,
                    "Handler succeeded"
                ),
                Outcome::Error(error) => debug!(
                    point = info.point_name(),
                    handler = %entry.handler,
                    duration_ms,
                    error = %error,
                    "Handler failed"
                ),
                Outcome::Skipped(reason) => debug!(
                    point = info.point_name(),
                    handler = %entry.handler,
                    reason = reason.as_str(),
                    "Handler skipped"
                ),
            }
        }
    }
}
