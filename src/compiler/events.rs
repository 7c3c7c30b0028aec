//! Event logging for the rewriting pipeline.
//!
//! Every transformation and diagnostic is recorded in an [`EventLog`]. The log
//! is append-only and lock-free, so passes running on different methods in
//! parallel share one log through `&self`.
//!
//! Each event is also forwarded to the [`log`] facade when it is recorded:
//! transformations at `trace`, engine progress at `debug`, warnings at `warn`
//! and errors at `error`. The library never installs a logger.
//!
//! # Example
//!
//! ```rust
//! use cflowkit::{compiler::{EventKind, EventLog}, metadata::Token};
//!
//! let log = EventLog::new();
//! log.record(EventKind::StringDecrypted)
//!     .at(Token::new(0x0600_0001), 3)
//!     .message("\"hello\"");
//! log.warn("argument 0 of Foo::Bar is unknown");
//!
//! assert_eq!(log.count_kind(EventKind::StringDecrypted), 1);
//! assert_eq!(log.warnings().count(), 1);
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::metadata::Token;

/// Categories of recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An oracle call was replaced by a string literal.
    StringDecrypted,
    /// An oracle call was replaced by a non-string literal.
    ConstantDecrypted,
    /// A redundant normalize helper after an inlined call was removed.
    HelperRemoved,
    /// A conditional branch was rewritten or folded.
    BranchSimplified,
    /// A conditional branch was inverted to fall through to its target.
    BranchFlipped,
    /// An unreachable block was removed.
    BlockRemoved,
    /// Two blocks were merged into one.
    BlockMerged,
    /// An edge was redirected past a nop block.
    NopBlockBypassed,
    /// A method body was flattened back to an instruction stream.
    CodeRegenerated,

    /// A pass reported a change.
    PassCompleted,
    /// Method processing started.
    MethodProcessingStarted,
    /// Method processing completed.
    MethodProcessingCompleted,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (a method was left untouched).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::StringDecrypted => "string decrypted",
            Self::ConstantDecrypted => "constant decrypted",
            Self::HelperRemoved => "helper removed",
            Self::BranchSimplified => "branch simplified",
            Self::BranchFlipped => "branch flipped",
            Self::BlockRemoved => "block removed",
            Self::BlockMerged => "block merged",
            Self::NopBlockBypassed => "nop block bypassed",
            Self::CodeRegenerated => "code regenerated",
            Self::PassCompleted => "pass completed",
            Self::MethodProcessingStarted => "method processing started",
            Self::MethodProcessingCompleted => "method processing completed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::StringDecrypted
                | Self::ConstantDecrypted
                | Self::HelperRemoved
                | Self::BranchSimplified
                | Self::BranchFlipped
                | Self::BlockRemoved
                | Self::BlockMerged
                | Self::NopBlockBypassed
                | Self::CodeRegenerated
        )
    }

    /// Returns true if this is a diagnostic event (info/warning/error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }

    fn log_level(self) -> log::Level {
        match self {
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
            Self::Info
            | Self::PassCompleted
            | Self::MethodProcessingStarted
            | Self::MethodProcessingCompleted => log::Level::Debug,
            _ => log::Level::Trace,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (if applicable).
    pub method: Option<Token>,
    /// Location within the method (block index or instruction index).
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }

    fn forward(&self) {
        let level = self.kind.log_level();
        if !log::log_enabled!(target: "cflowkit", level) {
            return;
        }
        match (self.method, &self.pass) {
            (Some(method), Some(pass)) => {
                log::log!(target: "cflowkit", level, "{method} [{pass}] {}: {}", self.kind, self.message);
            }
            (Some(method), None) => {
                log::log!(target: "cflowkit", level, "{method} {}: {}", self.kind, self.message);
            }
            _ => log::log!(target: "cflowkit", level, "{}", self.message),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<Token>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and location where the event occurred.
    pub fn at(mut self, method: Token, location: usize) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets only the method.
    pub fn method(mut self, method: Token) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.push(Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Collection of events from one engine run.
///
/// Statistics are derived from the events rather than tracked separately.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        for (_, event) in &self.events {
            new_log.events.push(event.clone());
        }
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    fn push(&self, event: Event) {
        event.forward();
        self.events.push(event);
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.push(Event::new(EventKind::Error, message));
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over events for a specific method.
    pub fn filter_method(&self, method: Token) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.method == Some(method))
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Returns an iterator over error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of unique methods with transformations.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.method)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of the transformation counts.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Number of methods that had any transformations.
    pub methods_transformed: usize,
    /// Number of oracle calls replaced by string literals.
    pub strings_decrypted: usize,
    /// Number of oracle calls replaced by other literals.
    pub constants_decrypted: usize,
    /// Number of blocks removed.
    pub blocks_removed: usize,
    /// Number of block merges.
    pub blocks_merged: usize,
    /// Number of branches simplified or flipped.
    pub branches_simplified: usize,
    /// Number of methods flattened.
    pub methods_regenerated: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            strings_decrypted: get(EventKind::StringDecrypted),
            constants_decrypted: get(EventKind::ConstantDecrypted),
            blocks_removed: get(EventKind::BlockRemoved),
            blocks_merged: get(EventKind::BlockMerged),
            branches_simplified: get(EventKind::BranchSimplified) + get(EventKind::BranchFlipped),
            methods_regenerated: get(EventKind::CodeRegenerated),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let counters = [
            (self.methods_transformed, "methods"),
            (self.strings_decrypted, "strings decrypted"),
            (self.constants_decrypted, "constants decrypted"),
            (self.blocks_removed, "blocks removed"),
            (self.blocks_merged, "blocks merged"),
            (self.branches_simplified, "branches simplified"),
            (self.methods_regenerated, "regenerated"),
            (self.errors, "errors"),
            (self.warnings, "warnings"),
        ];
        let parts: Vec<String> = counters
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, label)| format!("{n} {label}"))
            .collect();

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!("{} in {:?}", stats, self.total_time)
        } else {
            stats
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.summary(), "no events");
        assert!(!log.has(EventKind::StringDecrypted));
    }

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        let method = Token::new(0x0600_0001);

        log.record(EventKind::StringDecrypted)
            .at(method, 2)
            .pass("CallInlining")
            .message("\"hello\"");

        let event = log.iter().next().unwrap();
        assert_eq!(event.method, Some(method));
        assert_eq!(event.location, Some(2));
        assert_eq!(event.pass.as_deref(), Some("CallInlining"));
        assert_eq!(event.message, "\"hello\"");
    }

    #[test]
    fn test_default_message() {
        let log = EventLog::new();
        log.record(EventKind::BlockMerged).method(Token::new(0x0600_0001));
        assert_eq!(log.iter().next().unwrap().message, "block merged");
    }

    #[test]
    fn test_summary_counts_transformations_only() {
        let log = EventLog::new();
        let method = Token::new(0x0600_0001);
        log.record(EventKind::StringDecrypted).at(method, 0);
        log.record(EventKind::StringDecrypted).at(method, 4);
        log.record(EventKind::BlockRemoved).at(method, 1);
        log.warn("ignored in summary");

        assert_eq!(log.summary(), "1 block removed, 2 string decrypted");
        assert_eq!(log.methods_affected(), 1);
    }

    #[test]
    fn test_derived_stats() {
        let log = EventLog::new();
        log.record(EventKind::StringDecrypted).at(Token::new(0x0600_0001), 0);
        log.record(EventKind::BranchFlipped).at(Token::new(0x0600_0002), 0);
        log.record(EventKind::BranchSimplified).at(Token::new(0x0600_0002), 1);
        log.error("method failed");

        let stats = DerivedStats::from_log(&log);
        assert_eq!(stats.methods_transformed, 2);
        assert_eq!(stats.branches_simplified, 2);
        assert_eq!(stats.errors, 1);
        assert!(stats.summary().contains("1 strings decrypted"));
    }

    #[test]
    fn test_thread_safe_append() {
        use std::{sync::Arc, thread};

        let log = Arc::new(EventLog::new());
        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for j in 0..50 {
                        log.record(EventKind::BlockRemoved)
                            .at(Token::new(0x0600_0000 + i), j);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 200);
    }
}
