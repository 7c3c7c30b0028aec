//! Deobfuscation result types.

use std::time::Duration;

use crate::{
    compiler::{DerivedStats, EventLog},
    metadata::{MethodBody, Token},
};

/// Result of a deobfuscation run.
///
/// Contains the rewritten bodies, the event log and the methods whose
/// rewrite was aborted. Statistics are derived from the event log on demand.
///
/// # Example
///
/// ```rust,ignore
/// use cflowkit::deobfuscation::{DeobfuscationEngine, EngineConfig};
///
/// let result = engine.process(bodies)?;
///
/// println!("Events: {}", result.events.len());
/// println!("Stats: {}", result.stats().summary());
/// ```
#[derive(Debug, Clone)]
pub struct DeobfuscationResult {
    /// One body per input method, in input order. Failed and unchanged
    /// methods keep their original body.
    pub bodies: Vec<MethodBody>,
    /// All events from the run.
    pub events: EventLog,
    /// Methods whose rewrite was aborted, with the reason, in token order.
    pub failed: Vec<(Token, String)>,
    /// Number of pipeline iterations.
    pub iterations: usize,
    /// Total processing time.
    pub total_time: Duration,
}

impl DeobfuscationResult {
    /// Creates a new result.
    #[must_use]
    pub fn new(bodies: Vec<MethodBody>, events: EventLog) -> Self {
        Self {
            bodies,
            events,
            failed: Vec::new(),
            iterations: 0,
            total_time: Duration::ZERO,
        }
    }

    /// Sets timing and iteration info.
    #[must_use]
    pub fn with_timing(mut self, time: Duration, iterations: usize) -> Self {
        self.total_time = time;
        self.iterations = iterations;
        self
    }

    /// The output body of `token`.
    #[must_use]
    pub fn body(&self, token: Token) -> Option<&MethodBody> {
        self.bodies.iter().find(|b| b.token == token)
    }

    /// Returns `true` if the rewrite of `token` was aborted.
    #[must_use]
    pub fn is_failed(&self, token: Token) -> bool {
        self.failed.iter().any(|(t, _)| *t == token)
    }

    /// Computes statistics derived from the event log.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        DerivedStats::from_log(&self.events).with_time(self.total_time)
    }

    /// Generates a human-readable summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.failed.is_empty() {
            self.stats().summary()
        } else {
            format!("{} ({} failed)", self.stats().summary(), self.failed.len())
        }
    }
}
