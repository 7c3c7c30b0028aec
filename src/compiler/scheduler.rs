//! Fixpoint execution of graph passes.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::{
    compiler::{CfgPass, EventKind, PassContext},
    metadata::Token,
    Result,
};

/// Orchestrates pass execution in a phased pipeline.
///
/// The scheduler runs passes in a 2-phase pipeline:
///
/// 1. **Normalize**: dead blocks, nop blocks, block merging, branch layout
/// 2. **Value Recovery**: call-result inlining + normalize
///
/// Each phase runs to fixpoint (until no more changes) before proceeding.
/// The entire pipeline is then repeated until `stable_iterations`
/// consecutive iterations change nothing, or `max_iterations` is reached.
#[allow(clippy::struct_field_names)]
pub struct PassScheduler {
    /// Maximum iterations for the entire pipeline.
    max_iterations: usize,
    /// Number of stable iterations before stopping.
    stable_iterations: usize,
    /// Maximum iterations for a single phase before moving on.
    max_phase_iterations: usize,
    /// Value recovery passes (call-result inlining).
    pub value: Vec<Box<dyn CfgPass>>,
    /// Normalization passes.
    /// Run on their own first, then after every productive value sweep.
    pub normalize: Vec<Box<dyn CfgPass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(5, 2, 15)
    }
}

impl PassScheduler {
    /// Creates a new scheduler with the specified iteration limits.
    ///
    /// # Arguments
    ///
    /// * `max_iterations` - Maximum iterations for the entire pipeline before stopping.
    /// * `stable_iterations` - Stop early if no changes for this many iterations.
    /// * `max_phase_iterations` - Maximum iterations for a single phase before moving on.
    #[must_use]
    pub fn new(
        max_iterations: usize,
        stable_iterations: usize,
        max_phase_iterations: usize,
    ) -> Self {
        Self {
            max_iterations,
            stable_iterations,
            max_phase_iterations,
            value: Vec::new(),
            normalize: Vec::new(),
        }
    }

    /// Runs normalization passes until no more changes occur.
    ///
    /// Returns `true` if any changes were made during this phase.
    fn normalize_to_fixpoint(
        ctx: &PassContext,
        passes: &mut [Box<dyn CfgPass>],
        max_phase_iterations: usize,
    ) -> Result<bool> {
        let mut any_changed = false;

        for _ in 0..max_phase_iterations {
            if !Self::run_passes_once(ctx, passes)? {
                break;
            }
            any_changed = true;
        }

        Ok(any_changed)
    }

    /// Runs a phase to fixpoint: execute phase passes, then normalize until stable.
    ///
    /// Returns `true` if any changes were made during this phase.
    fn phase_to_fixpoint(
        ctx: &PassContext,
        phase_passes: &mut [Box<dyn CfgPass>],
        normalize_passes: &mut [Box<dyn CfgPass>],
        max_phase_iterations: usize,
    ) -> Result<bool> {
        if phase_passes.is_empty() {
            return Ok(false);
        }

        let mut phase_changed = false;

        for _ in 0..max_phase_iterations {
            if !Self::run_passes_once(ctx, phase_passes)? {
                break;
            }
            phase_changed = true;

            // Folding calls leaves nops and straight-line chains behind.
            if !normalize_passes.is_empty() {
                Self::normalize_to_fixpoint(ctx, normalize_passes, max_phase_iterations)?;
            }
        }

        Ok(phase_changed)
    }

    /// Runs one pass on one method.
    ///
    /// The graph is taken out of the context while the pass runs. If the
    /// pass fails, the method is marked failed and its graph discarded.
    fn run_on(pass: &dyn CfgPass, token: Token, ctx: &PassContext) -> bool {
        if ctx.is_failed(token) || !pass.should_run(token, ctx) {
            return false;
        }
        let Some(mut cfg) = ctx.take(token) else {
            return false;
        };

        match pass.run_on_method(&mut cfg, ctx) {
            Ok(changed) => {
                ctx.insert(cfg);
                if changed {
                    ctx.mark_processed(token);
                }
                changed
            }
            Err(err) => {
                ctx.events
                    .record(EventKind::Error)
                    .method(token)
                    .pass(pass.name())
                    .message(format!("{} failed: {err}", pass.name()));
                ctx.fail(token, &err);
                false
            }
        }
    }

    /// Runs all passes once over all methods.
    ///
    /// Returns `true` if any pass made changes. Methods are processed in
    /// parallel with rayon unless the context asks for sequential execution.
    fn run_passes_once(ctx: &PassContext, passes: &mut [Box<dyn CfgPass>]) -> Result<bool> {
        let any_changed = AtomicBool::new(false);

        for pass in passes.iter_mut() {
            pass.initialize(ctx)?;
        }

        let methods = ctx.methods();

        for pass in passes.iter() {
            let pass = pass.as_ref();
            let run = |&token: &Token| {
                if Self::run_on(pass, token, ctx) {
                    any_changed.store(true, Ordering::Relaxed);
                }
            };
            if ctx.parallel {
                methods.par_iter().for_each(run);
            } else {
                methods.iter().for_each(run);
            }
        }

        Ok(any_changed.load(Ordering::Relaxed))
    }

    /// Runs the complete pipeline.
    ///
    /// Returns the number of iterations completed. Events are accumulated in
    /// `ctx.events`; per-method failures are recorded in `ctx.failed_methods`
    /// and do not stop the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if a pass fails to initialize.
    pub fn run_pipeline(&mut self, ctx: &PassContext) -> Result<usize> {
        let mut stable_count = 0;
        let mut iterations = 0;
        let max_phase = self.max_phase_iterations;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;
            let mut iteration_changed = false;

            if Self::normalize_to_fixpoint(ctx, &mut self.normalize, max_phase)? {
                iteration_changed = true;
            }

            if Self::phase_to_fixpoint(ctx, &mut self.value, &mut self.normalize, max_phase)? {
                iteration_changed = true;
            }

            ctx.events
                .record(EventKind::PassCompleted)
                .message(format!("pipeline iteration {iterations} (changed: {iteration_changed})"));

            if iteration_changed {
                stable_count = 0;
            } else {
                stable_count += 1;
                if stable_count >= self.stable_iterations {
                    break;
                }
            }
        }

        Ok(iterations)
    }
}
