//! Shared state of one pipeline run.
//!
//! The [`PassContext`] owns every method graph while passes run. All fields
//! are thread-safe collections so methods can be processed in parallel
//! through a shared reference.

use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};

use crate::{analysis::MethodCfg, compiler::events::EventLog, metadata::Token, Error};

/// State shared by all passes of one pipeline run.
pub struct PassContext {
    /// Graph of each method still being rewritten.
    ///
    /// The scheduler takes a graph out while a pass runs on it and puts it
    /// back afterwards; a failed method's graph is not put back.
    pub cfgs: DashMap<Token, MethodCfg>,

    /// Accumulated events from all passes.
    pub events: EventLog,

    /// Methods changed by at least one pass.
    pub processed_methods: DashSet<Token>,

    /// Methods whose rewrite was aborted, with the reason.
    pub failed_methods: DashMap<Token, String>,

    /// Run methods in parallel.
    pub parallel: bool,

    start_time: Instant,
}

impl Default for PassContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PassContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cfgs: DashMap::new(),
            events: EventLog::new(),
            processed_methods: DashSet::new(),
            failed_methods: DashMap::new(),
            parallel: true,
            start_time: Instant::now(),
        }
    }

    /// Returns the elapsed time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Adds a method graph.
    pub fn insert(&self, cfg: MethodCfg) {
        self.cfgs.insert(cfg.token(), cfg);
    }

    /// Removes and returns a method graph.
    pub fn take(&self, token: Token) -> Option<MethodCfg> {
        self.cfgs.remove(&token).map(|(_, cfg)| cfg)
    }

    /// Tokens of all methods still being rewritten, in token order.
    #[must_use]
    pub fn methods(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.cfgs.iter().map(|e| *e.key()).collect();
        tokens.sort_unstable();
        tokens
    }

    /// Records that a method was changed.
    pub fn mark_processed(&self, token: Token) {
        self.processed_methods.insert(token);
    }

    /// Returns `true` if any pass changed the method.
    #[must_use]
    pub fn is_processed(&self, token: Token) -> bool {
        self.processed_methods.contains(&token)
    }

    /// Aborts the rewrite of a method; its graph is discarded.
    pub fn fail(&self, token: Token, error: &Error) {
        self.cfgs.remove(&token);
        self.failed_methods.insert(token, error.to_string());
        self.events
            .record(crate::compiler::EventKind::Error)
            .method(token)
            .message(format!("rewrite aborted: {error}"));
    }

    /// Returns `true` if the method's rewrite was aborted.
    #[must_use]
    pub fn is_failed(&self, token: Token) -> bool {
        self.failed_methods.contains_key(&token)
    }
}
