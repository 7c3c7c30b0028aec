//! Configuration for the deobfuscation engine.
//!
//! This module provides configuration types for controlling the pipeline,
//! including pass selection, iteration limits, argument recovery strictness
//! and evaluator limits.

use std::time::Duration;

use crate::{Error, Result};

/// How the inliner treats calls whose arguments are not all known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentMode {
    /// Skip the call and log a warning naming the unresolved operand.
    Strict,
    /// Keep the call with `Unknown` placeholders.
    ///
    /// Only honoured when the evaluator reports that it tolerates unknown
    /// inputs; otherwise the inliner falls back to [`ArgumentMode::Strict`].
    Permissive,
}

/// Configuration for the deobfuscation engine.
///
/// Controls all aspects of the pipeline including iteration limits, pass
/// selection and evaluation parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Treatment of calls with unresolved arguments (default: strict).
    pub argument_mode: ArgumentMode,

    /// Evaluate all calls to the same target of one method in a single batch
    /// (default: true).
    pub batch_evaluation: bool,

    /// Timeout for one evaluator batch (default: 5s).
    pub evaluator_timeout: Duration,

    /// Maximum iterations for the pass scheduler (default: 20).
    pub max_iterations: usize,

    /// Number of stable iterations before stopping (default: 2).
    pub stable_iterations: usize,

    /// Maximum iterations per phase before moving on (default: 10).
    pub max_phase_iterations: usize,

    /// Enable the graph simplification passes.
    pub enable_simplification: bool,

    /// Enable call-result inlining.
    pub enable_inlining: bool,

    /// Full names of calls and casts made redundant by a literal string
    /// result when they directly follow the inlined call.
    pub normalize_helpers: Vec<String>,

    /// Process methods on the rayon thread pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            argument_mode: ArgumentMode::Strict,
            batch_evaluation: true,
            evaluator_timeout: Duration::from_secs(5),
            max_iterations: 20,
            stable_iterations: 2,
            max_phase_iterations: 10,
            enable_simplification: true,
            enable_inlining: true,
            normalize_helpers: vec![
                "System.String".to_string(),
                "System.String::Intern".to_string(),
            ],
            parallel: true,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that only inlines calls with fully known arguments.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            argument_mode: ArgumentMode::Strict,
            ..Self::default()
        }
    }

    /// Creates a configuration that keeps calls with unknown arguments.
    ///
    /// Use this with evaluators that match on structure rather than on
    /// argument values.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            argument_mode: ArgumentMode::Permissive,
            ..Self::default()
        }
    }

    /// Sets the maximum number of iterations.
    ///
    /// # Arguments
    ///
    /// * `max` - The maximum number of pipeline iterations.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Sets the evaluator timeout.
    #[must_use]
    pub fn with_evaluator_timeout(mut self, timeout: Duration) -> Self {
        self.evaluator_timeout = timeout;
        self
    }

    /// Sets the argument mode.
    #[must_use]
    pub fn with_argument_mode(mut self, mode: ArgumentMode) -> Self {
        self.argument_mode = mode;
        self
    }

    /// Enables or disables parallel method processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Adds a normalize helper by full name (`Namespace.Type` for casts,
    /// `Namespace.Type::Method` for calls).
    #[must_use]
    pub fn with_normalize_helper(mut self, name: impl Into<String>) -> Self {
        self.normalize_helpers.push(name.into());
        self
    }

    /// Checks that the limits allow the pipeline to make progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero iteration limit or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.stable_iterations == 0 {
            return Err(Error::Configuration(
                "stable_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_phase_iterations == 0 {
            return Err(Error::Configuration(
                "max_phase_iterations must be at least 1".to_string(),
            ));
        }
        if self.evaluator_timeout.is_zero() {
            return Err(Error::Configuration(
                "evaluator_timeout must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}
